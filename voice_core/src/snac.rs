//! Token-id handling for the 24 kHz SNAC codec.
//!
//! The model emits audio as a flat stream of token ids. Ids inside the SNAC
//! range carry codec codes, seven per frame, interleaved across the codec's
//! three levels.

use crate::adapters::Latents;

pub const CODE_START_TOKEN_ID: u32 = 128_257;
pub const CODE_END_TOKEN_ID: u32 = 128_258;
pub const CODE_TOKEN_OFFSET: u32 = 128_266;
pub const SNAC_MIN_ID: u32 = 128_266;
pub const SNAC_MAX_ID: u32 = 156_937;
pub const SNAC_TOKENS_PER_FRAME: usize = 7;
pub const SNAC_SAMPLE_RATE: u32 = 24_000;

const CODEBOOK_SIZE: u32 = 4096;

/// Keep only SNAC-range ids that appear before the first end-of-codes token.
pub fn extract_codes(token_ids: &[u32]) -> Vec<u32> {
    let end = token_ids
        .iter()
        .position(|&id| id == CODE_END_TOKEN_ID)
        .unwrap_or(token_ids.len());

    token_ids[..end]
        .iter()
        .copied()
        .filter(|id| (SNAC_MIN_ID..=SNAC_MAX_ID).contains(id))
        .collect()
}

/// Unpack 7-token frames into the three codec levels. A trailing partial
/// frame is dropped.
pub fn unpack_frames(codes: &[u32]) -> Latents {
    let frames = codes.len() / SNAC_TOKENS_PER_FRAME;
    let mut latents = Latents {
        levels: [
            Vec::with_capacity(frames),
            Vec::with_capacity(frames * 2),
            Vec::with_capacity(frames * 4),
        ],
    };

    let code = |id: u32| id.saturating_sub(CODE_TOKEN_OFFSET) % CODEBOOK_SIZE;

    for slots in codes.chunks_exact(SNAC_TOKENS_PER_FRAME) {
        latents.levels[0].push(code(slots[0]));
        latents.levels[1].extend([code(slots[1]), code(slots[4])]);
        latents.levels[2].extend([
            code(slots[2]),
            code(slots[3]),
            code(slots[5]),
            code(slots[6]),
        ]);
    }
    latents
}

/// Extract and unpack in one step, failing when not even one full frame was
/// generated.
pub fn latents_from_tokens(token_ids: &[u32]) -> anyhow::Result<Latents> {
    let codes = extract_codes(token_ids);
    if codes.len() < SNAC_TOKENS_PER_FRAME {
        anyhow::bail!(
            "Not enough SNAC tokens generated: {} < {}",
            codes.len(),
            SNAC_TOKENS_PER_FRAME
        );
    }
    Ok(unpack_frames(&codes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(base: u32) -> Vec<u32> {
        (0..7).map(|i| CODE_TOKEN_OFFSET + base + i).collect()
    }

    #[test]
    fn test_extract_stops_at_end_token_and_filters_range() {
        let mut ids = vec![1, CODE_START_TOKEN_ID, SNAC_MIN_ID, SNAC_MAX_ID, SNAC_MAX_ID + 1];
        ids.push(CODE_END_TOKEN_ID);
        ids.push(SNAC_MIN_ID + 5);
        assert_eq!(extract_codes(&ids), vec![SNAC_MIN_ID, SNAC_MAX_ID]);
    }

    #[test]
    fn test_unpack_interleaving() {
        let codes = frame(0);
        let latents = unpack_frames(&codes);
        assert_eq!(latents.levels[0], vec![0]);
        assert_eq!(latents.levels[1], vec![1, 4]);
        assert_eq!(latents.levels[2], vec![2, 3, 5, 6]);
        assert_eq!(latents.frames(), 1);
    }

    #[test]
    fn test_unpack_drops_partial_frame_and_wraps_codebook() {
        let mut codes = frame(4096);
        codes.extend(frame(10));
        codes.extend([CODE_TOKEN_OFFSET; 3]);
        let latents = unpack_frames(&codes);
        assert_eq!(latents.frames(), 2);
        assert_eq!(latents.levels[0], vec![0, 10]);
        assert_eq!(latents.levels[1].len(), 4);
        assert_eq!(latents.levels[2].len(), 8);
    }

    #[test]
    fn test_too_few_codes_is_an_error() {
        let ids: Vec<u32> = frame(0).into_iter().take(6).collect();
        let err = latents_from_tokens(&ids).unwrap_err();
        assert!(err.to_string().contains("Not enough SNAC tokens"));
        assert!(latents_from_tokens(&frame(0)).is_ok());
    }
}
