pub mod prod_db;
pub mod rki;
