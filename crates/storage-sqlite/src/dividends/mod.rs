mod model;
mod repository;

pub use model::DividendDB;
pub use repository::DividendRepository;
