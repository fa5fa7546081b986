pub mod payment_steps;
pub mod table_service;
