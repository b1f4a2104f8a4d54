pub mod fix_processor;

pub use fix_processor::{handle_background_fixes, FixPipeline};
