pub mod app_config;
pub mod database;
pub mod memory_repo;
pub mod reservation_repo;
pub mod schedule_repo;

pub use database::DbClient;
pub use memory_repo::InMemoryReservationStore;
pub use reservation_repo::PgReservationStore;
pub use schedule_repo::PgScheduleStore;
