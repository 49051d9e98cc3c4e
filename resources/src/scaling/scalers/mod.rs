pub mod cron;
pub mod external_http;
