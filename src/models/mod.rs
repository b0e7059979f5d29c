pub mod audio;
pub mod devices;
pub mod midi;
pub mod mix;
pub mod presets;
pub mod sets;
