pub mod buffer_pool;
pub mod flac_format;
pub mod frame_encoder;
pub mod pcm;
pub mod wav_format;
