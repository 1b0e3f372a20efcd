pub mod memory_deposit_repository;
pub mod postgres_deposit_repository;

pub use memory_deposit_repository::InMemoryDepositRepository;
pub use postgres_deposit_repository::PostgresDepositRepository;
