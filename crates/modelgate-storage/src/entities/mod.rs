pub mod channels;
pub mod error_logs;
pub mod tokens;
pub mod users;

pub use channels::Entity as Channels;
pub use error_logs::Entity as ErrorLogs;
pub use tokens::Entity as Tokens;
pub use users::Entity as Users;
