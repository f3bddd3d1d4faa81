pub mod feature_service;
pub mod landkreis_archive;
pub mod request_log;
