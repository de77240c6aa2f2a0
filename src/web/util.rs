use bytes::Bytes;
use http_body_util::Full;
use hyper::{header::CONTENT_TYPE, Response, StatusCode};
use serde::Serialize;

pub fn json_ok<T: Serialize>(value: T) -> Response<Full<Bytes>> {
    json(value, StatusCode::OK)
}

pub fn json<T: Serialize>(value: T, code: StatusCode) -> Response<Full<Bytes>> {
    let serialized = match serde_json::to_vec(&value) {
        Ok(v) => v,
        Err(err) => {
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "text/plain")
                .body(Full::new(Bytes::from(err.to_string())))
                .unwrap();
        }
    };

    Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(serialized)))
        .unwrap()
}
