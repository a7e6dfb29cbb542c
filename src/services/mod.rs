//! Background services

pub mod http_server;
pub mod manager;
pub mod scan_queue;
pub mod scanner;

pub use http_server::HttpServerService;
pub use manager::{HealthStatus, Service, ServiceHealth, ServicesManager};
pub use scan_queue::{HistoryPruner, ScanQueue, ScanQueueConfig, ScanWorker};
pub use scanner::DirectoryScanExecutor;
