pub mod audit_logger;
pub mod path_utils;
