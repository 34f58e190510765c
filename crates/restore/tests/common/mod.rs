pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{
    Broken, RecordingHandler, SharedBytes, crc, deflate, deflated_file, failing_reader, manifest_file,
    new_process, new_process_with, single_format, static_reader, wait_for_bytes, wait_for_state,
};
