pub fn default_postgres_port() -> u16 {
    5432
}

pub fn default_ssl_mode() -> String {
    "require".to_string()
}

pub fn default_max_connections() -> u32 {
    5
}

pub fn default_connection_timeout() -> u64 {
    30
}

pub fn default_idle_timeout() -> u64 {
    600
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_print_logs() -> bool {
    true
}

pub fn default_log_backup_count() -> usize {
    3
}

pub fn default_identifier_table() -> String {
    "instrument_identifiers".to_string()
}

pub fn default_insert_batch_size() -> usize {
    1000
}
