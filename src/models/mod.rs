pub mod customer;
pub mod ticket;
pub mod transaction;

pub use customer::Customer;
pub use ticket::{Ticket, TicketStatus};
pub use transaction::{CartItem, Transaction, TransactionStatus};
