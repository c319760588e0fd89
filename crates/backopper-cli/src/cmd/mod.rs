pub mod backup;
pub mod cron;
pub mod remote;
