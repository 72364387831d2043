pub mod embedded_data;
pub mod sessions;
