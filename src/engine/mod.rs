pub mod assignment;
pub mod deliveries;
pub mod orders;
pub mod routes;
pub mod scoring;
pub mod sync;
