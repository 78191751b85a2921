pub mod image_allocator;
pub mod image_desc;
