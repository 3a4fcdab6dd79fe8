//! WAV header repair for buffered streaming responses.
//!
//! Speech services that stream WAV write `0xFFFFFFFF` placeholders for the
//! RIFF and `data` chunk sizes because the length is unknown up front. Once
//! the whole body is buffered the real sizes can be filled in, which keeps
//! strict decoders happy.

const UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;
const RIFF_HEADER_LEN: usize = 12;

/// True if `buf` starts with a RIFF/WAVE header.
pub fn is_wav(buf: &[u8]) -> bool {
    buf.len() >= RIFF_HEADER_LEN && &buf[0..4] == b"RIFF" && &buf[8..12] == b"WAVE"
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Rewrite the RIFF and `data` sizes to match the buffered length.
///
/// Non-WAV input is returned untouched.
pub fn repair_sizes(mut wav: Vec<u8>) -> Vec<u8> {
    if !is_wav(&wav) {
        return wav;
    }

    let riff_size = (wav.len() - 8) as u32;
    wav[4..8].copy_from_slice(&riff_size.to_le_bytes());

    let mut pos = RIFF_HEADER_LEN;
    while pos + 8 <= wav.len() {
        if &wav[pos..pos + 4] == b"data" {
            let data_size = (wav.len() - pos - 8) as u32;
            wav[pos + 4..pos + 8].copy_from_slice(&data_size.to_le_bytes());
            break;
        }
        match read_u32(&wav, pos + 4) {
            // A placeholder before `data` means we cannot walk further.
            UNKNOWN_SIZE => break,
            size => pos += 8 + size as usize + (size as usize & 1),
        }
    }

    wav
}
