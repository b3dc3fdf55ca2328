pub const CANDLE_RESOLUTIONS: [&str; 6] = ["1m", "5m", "15m", "1h", "4h", "1d"];

pub const LOG_FORMATS: [&str; 3] = ["pretty", "json", "compact"];

pub fn default_enabled() -> bool {
    true
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_max_connections() -> u32 {
    20
}

pub fn default_connection_timeout() -> u64 {
    30
}

pub fn default_operation_timeout_ms() -> u64 {
    5_000
}

pub fn default_workers() -> usize {
    16
}

pub fn default_queue_capacity() -> usize {
    1_024
}

pub fn default_candle_resolutions() -> Vec<String> {
    CANDLE_RESOLUTIONS.iter().map(|r| r.to_string()).collect()
}

pub fn default_candle_limit() -> usize {
    2
}

pub fn default_exchange_topic() -> String {
    "exchange".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
