pub mod routes;
pub mod store;

pub use store::{message_images_dir, store_image, ImageFormat};
