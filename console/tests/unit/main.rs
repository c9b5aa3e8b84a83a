mod fakes;
mod test_cache_cluster;
mod test_http;
mod test_log_shipping;
mod test_replication;
mod test_store;
