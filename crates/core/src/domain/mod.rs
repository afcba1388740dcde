pub mod approval;
pub mod company;
pub mod expense;
pub mod user;
