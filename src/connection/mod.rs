pub mod session;
pub mod manager;
pub mod delay_commit;
pub mod cursor;
pub mod locks;
pub mod introspect;
