pub mod job;
pub mod wardrobe;
