pub mod drive;
pub mod gmail;
pub mod hubspot;
pub mod quickbooks;
pub mod slack;
pub mod trello;
