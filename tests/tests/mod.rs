mod replication;
mod scenarios;
