//! Exposes a [`Host`] over HTTP so that client windows living in other
//! processes can pull changes and subscribe to notifications.

mod api;
mod util;

use std::{convert::Infallible, io, net::SocketAddr, sync::Arc, time::Duration};

use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::{host::Host, interface::ErrorResponse};

pub use self::api::EventsAccepted;

const MAX_BIND_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;

pub struct LiveServer {
    host: Arc<Host>,
}

impl LiveServer {
    pub fn new(host: Arc<Host>) -> Self {
        LiveServer { host }
    }

    /// Binds `address`, retrying for a little while if the port is still held
    /// by a previous run.
    pub async fn bind(address: SocketAddr) -> io::Result<TcpListener> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match TcpListener::bind(address).await {
                Ok(listener) => return Ok(listener),
                Err(err)
                    if err.kind() == io::ErrorKind::AddrInUse && attempts < MAX_BIND_ATTEMPTS =>
                {
                    let delay = BASE_BACKOFF_MS * 2u64.pow(attempts - 1);
                    log::warn!(
                        "Port {} in use, retrying in {}ms (attempt {}/{})",
                        address.port(),
                        delay,
                        attempts,
                        MAX_BIND_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Accepts connections until accepting fails.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let host = Arc::clone(&self.host);

            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let host = Arc::clone(&host);

                    async move {
                        if request.uri().path().starts_with("/api") {
                            Ok::<_, Infallible>(api::call(host, request).await)
                        } else {
                            Ok::<_, Infallible>(util::json(
                                ErrorResponse::not_found(format!(
                                    "Route not found: {}",
                                    request.uri().path()
                                )),
                                StatusCode::NOT_FOUND,
                            ))
                        }
                    }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    log::error!("Error serving connection: {err}");
                }
            });
        }
    }
}
