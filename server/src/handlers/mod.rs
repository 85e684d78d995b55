pub mod admin;
pub mod messages;
pub mod usage;

pub use admin::{
    create_api_key as create_api_key_admin, create_project as create_project_admin,
    get_project_admin, update_project_status,
};
pub use messages::{get_message, list_messages, send_message};
pub use usage::get_usage;
