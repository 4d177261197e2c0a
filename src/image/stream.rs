//! Image stream parser
//!
//! The scanner streams an image as little-endian 16-bit words. Words at or
//! above [`MARKER_MIN`] are control markers; everything below is a pixel
//! sample. Scanlines arrive as sparse segment runs separated by gap markers
//! and are composited into a dense rectangular grid at end of image.

use tracing::{debug, info, warn};

use crate::image::config::parse_scan_config;

/// Lowest word value interpreted as a control marker
pub const MARKER_MIN: u16 = 0xFFF9;

/// End of image; disables pixel collection
pub const MARKER_IMAGE_END: u16 = 0xFFFB;

/// Embedded config document follows (u16 byte count, then that many bytes)
pub const MARKER_CONFIG: u16 = 0xFFFC;

/// Padding word, no effect
pub const MARKER_NOP: u16 = 0xFFFD;

/// Start of line (operand: left x offset)
pub const MARKER_LINE_START: u16 = 0xFFFE;

/// Gap within a line (operand: number of missing pixels)
pub const MARKER_GAP: u16 = 0xFFFF;

/// A completed, owned image frame
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    /// Width of the pixel grid
    pub width: usize,
    /// Height of the pixel grid
    pub height: usize,
    /// Row-major 16-bit grayscale samples, `width * height` entries
    pub pixels: Vec<u16>,
    /// Nominal scanline width from the embedded config, or -1 when unknown
    pub pix_line: i32,
}

/// A contiguous run of pixels within a scanline
///
/// Segments reference the stream buffer by byte offset rather than by
/// pointer, so they stay valid for the whole rasterization pass.
#[derive(Debug, Clone, Copy)]
struct PixelSegment {
    x_start: i32,
    byte_offset: usize,
    pixel_count: i32,
}

/// A scanline as a list of segments plus its logical end position
#[derive(Debug, Clone, Default)]
struct ScanLine {
    segments: Vec<PixelSegment>,
    end_x: i32,
}

/// Accumulates segments into lines and lines into an image
#[derive(Debug, Default)]
struct LineAssembler {
    image: Vec<ScanLine>,
    current_line: ScanLine,
    current_seg: Option<PixelSegment>,
    in_line: bool,
    x: u16,
}

impl LineAssembler {
    /// Close the open segment, keeping it only if it collected pixels
    fn flush_segment(&mut self) {
        if let Some(seg) = self.current_seg.take() {
            if seg.pixel_count > 0 {
                self.current_line.segments.push(seg);
            }
        }
    }

    /// Close the open line, keeping it only if it has segments
    fn flush_line(&mut self) {
        if !self.in_line {
            return;
        }
        self.flush_segment();
        self.current_line.end_x = i32::from(self.x);
        if self.current_line.segments.is_empty() {
            self.current_line = ScanLine::default();
        } else {
            self.image.push(std::mem::take(&mut self.current_line));
        }
        self.in_line = false;
        self.x = 0;
    }
}

/// Parse an accumulated image stream into a dense frame
///
/// Returns `None` when the stream contains no pixels. A stream that ends
/// without an explicit end-of-image marker still flushes the open line.
pub fn parse_image(data: &[u8]) -> Option<ImageFrame> {
    let mut assembler = LineAssembler::default();
    let mut parsing_pixels = false;
    let mut pix_line = 0i32;

    let mut pos = 0usize;
    while pos + 2 <= data.len() {
        let word_offset = pos;
        let word = u16::from_le_bytes([data[pos], data[pos + 1]]);
        pos += 2;

        if word >= MARKER_MIN {
            match word {
                MARKER_LINE_START => {
                    if pos + 2 > data.len() {
                        break;
                    }
                    assembler.flush_line();

                    assembler.current_line = ScanLine::default();
                    assembler.current_seg = None;
                    assembler.in_line = true;
                    assembler.x = u16::from_le_bytes([data[pos], data[pos + 1]]);
                    pos += 2;
                    parsing_pixels = true;
                }

                MARKER_GAP => {
                    if pos + 2 > data.len() {
                        break;
                    }
                    let gap = u16::from_le_bytes([data[pos], data[pos + 1]]);
                    pos += 2;

                    if assembler.in_line {
                        assembler.flush_segment();
                        assembler.x = assembler.x.wrapping_add(gap);
                        parsing_pixels = true;
                    }
                }

                MARKER_CONFIG => {
                    if pos + 2 > data.len() {
                        break;
                    }
                    let size = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
                    pos += 2;

                    if pos + size <= data.len() {
                        // The document carries a trailing NUL.
                        let json = &data[pos..pos + size.saturating_sub(1)];
                        pos += size;
                        debug!(bytes = size, "parsing embedded scan config");
                        pix_line = parse_scan_config(json);
                    } else {
                        pos = data.len(); // skip incomplete document
                    }
                }

                MARKER_NOP => {}

                MARKER_IMAGE_END => {
                    assembler.flush_line();
                    parsing_pixels = false;
                }

                _ => {
                    warn!(marker = %format_args!("{word:#06x}"), "unknown stream marker");
                }
            }
        } else if parsing_pixels {
            if !assembler.in_line {
                continue;
            }
            if assembler.current_seg.is_none() {
                assembler.current_seg = Some(PixelSegment {
                    x_start: i32::from(assembler.x),
                    byte_offset: word_offset,
                    pixel_count: 0,
                });
            }
            if let Some(seg) = assembler.current_seg.as_mut() {
                seg.pixel_count += 1;
            }
            assembler.x = assembler.x.wrapping_add(1);
        }
    }

    // Stream may end without an explicit IMAGE_END.
    assembler.flush_line();

    rasterize(data, &assembler.image, pix_line)
}

/// Composite assembled scanlines into a dense, white-initialized pixel grid
fn rasterize(data: &[u8], image: &[ScanLine], pix_line: i32) -> Option<ImageFrame> {
    info!(lines = image.len(), "image stream parsed");
    if image.is_empty() {
        return None;
    }

    let mut min_left = i32::MAX;
    let mut max_right = 0i32;
    for line in image {
        for seg in &line.segments {
            if seg.pixel_count <= 0 {
                continue;
            }
            min_left = min_left.min(seg.x_start);
            max_right = max_right.max(seg.x_start + seg.pixel_count);
        }
    }
    if max_right == 0 {
        return None;
    }

    let width = (max_right - min_left) as usize;
    let height = image.len();
    let mut pixels = vec![0xFFFFu16; width * height];

    for (y, line) in image.iter().enumerate() {
        if pix_line > 0 && line.end_x != pix_line {
            warn!(
                line = y,
                end_x = line.end_x,
                pix_line,
                segments = line.segments.len(),
                "scanline width mismatch"
            );
        }

        let row = &mut pixels[y * width..(y + 1) * width];
        for seg in &line.segments {
            if seg.pixel_count <= 0 {
                continue;
            }
            let offset = seg.x_start - min_left;
            if offset < 0 {
                continue;
            }
            let offset = offset as usize;

            let copy_count = (seg.pixel_count as usize).min(width - offset);
            for i in 0..copy_count {
                let at = seg.byte_offset + i * 2;
                row[offset + i] = u16::from_le_bytes([data[at], data[at + 1]]);
            }
        }
    }

    Some(ImageFrame {
        width,
        height,
        pixels,
        pix_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_minimal_frame() {
        // One line: two pixels at x=2, a gap of 3, one pixel at x=7.
        let data = words(&[
            MARKER_LINE_START,
            0x0002,
            0x00AA,
            0x00BB,
            MARKER_GAP,
            0x0003,
            0x00CC,
            MARKER_IMAGE_END,
        ]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.width, 6);
        assert_eq!(frame.height, 1);
        assert_eq!(
            frame.pixels,
            vec![0x00AA, 0x00BB, 0xFFFF, 0xFFFF, 0xFFFF, 0x00CC]
        );
    }

    #[test]
    fn test_pixel_word_is_little_endian() {
        let mut data = words(&[MARKER_LINE_START, 0x0000]);
        data.extend_from_slice(&[0xFF, 0x00]); // 0x00FF little-endian
        data.extend(words(&[MARKER_IMAGE_END]));

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.pixels, vec![255]);
    }

    #[test]
    fn test_multiple_lines_bounding_box() {
        let data = words(&[
            MARKER_LINE_START,
            10,
            0x0001,
            0x0002,
            MARKER_LINE_START,
            12,
            0x0003,
            0x0004,
            0x0005,
            MARKER_IMAGE_END,
        ]);

        // min_left = 10, max_right = 15, width = 5, height = 2.
        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.width, 5);
        assert_eq!(frame.height, 2);
        assert_eq!(
            frame.pixels,
            vec![
                0x0001, 0x0002, 0xFFFF, 0xFFFF, 0xFFFF, //
                0xFFFF, 0xFFFF, 0x0003, 0x0004, 0x0005,
            ]
        );
    }

    #[test]
    fn test_config_marker_sets_pix_line() {
        let json = b"{\"AdditionalScanInfo\":{\"PixLine\":1234}}\0";
        let mut data = words(&[MARKER_CONFIG, json.len() as u16]);
        data.extend_from_slice(json);
        data.extend(words(&[MARKER_LINE_START, 0, 0x0042, MARKER_IMAGE_END]));

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.pix_line, 1234);
        assert_eq!(frame.pixels, vec![0x0042]);
    }

    #[test]
    fn test_pix_line_mismatch_does_not_reject() {
        let json = b"{\"AdditionalScanInfo\":{\"PixLine\":100}}\0";
        let mut data = words(&[MARKER_CONFIG, json.len() as u16]);
        data.extend_from_slice(json);
        // Line ends at x=3, nominal width says 100.
        data.extend(words(&[MARKER_LINE_START, 0, 1, 2, 3, MARKER_IMAGE_END]));

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.width, 3);
        assert_eq!(frame.height, 1);
    }

    #[test]
    fn test_truncated_config_skipped() {
        let mut data = words(&[MARKER_LINE_START, 0, 7, MARKER_CONFIG, 50]);
        data.extend_from_slice(b"short"); // far fewer than 50 bytes

        // Pixels before the truncated config still make a frame.
        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.pixels, vec![7]);
    }

    #[test]
    fn test_truncated_operand_terminates() {
        // Gap marker with no operand word following.
        let data = words(&[MARKER_LINE_START, 0, 5, 6, MARKER_GAP]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.pixels, vec![5, 6]);
    }

    #[test]
    fn test_missing_image_end_still_flushes() {
        let data = words(&[MARKER_LINE_START, 4, 9, 8]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 1);
        assert_eq!(frame.pixels, vec![9, 8]);
    }

    #[test]
    fn test_pixels_before_line_start_discarded() {
        let data = words(&[1, 2, 3, MARKER_LINE_START, 0, 4, MARKER_IMAGE_END]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.pixels, vec![4]);
    }

    #[test]
    fn test_gap_outside_line_ignored() {
        let data = words(&[MARKER_GAP, 100, MARKER_LINE_START, 0, 1, MARKER_IMAGE_END]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.width, 1);
        assert_eq!(frame.pixels, vec![1]);
    }

    #[test]
    fn test_consecutive_line_starts_drop_empty_line() {
        let data = words(&[
            MARKER_LINE_START,
            0,
            MARKER_LINE_START,
            0,
            0x0011,
            MARKER_IMAGE_END,
        ]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.height, 1);
        assert_eq!(frame.pixels, vec![0x0011]);
    }

    #[test]
    fn test_nop_and_unknown_markers_skipped() {
        let data = words(&[
            MARKER_NOP,
            0xFFF9, // unknown marker, logged and ignored
            MARKER_LINE_START,
            0,
            0x0001,
            0x0002,
            MARKER_IMAGE_END,
        ]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.pixels, vec![0x0001, 0x0002]);
    }

    #[test]
    fn test_overlapping_segments_later_wins() {
        // A wrapping gap rewinds x from 3 back to 1; the second segment
        // overwrites the middle column of the first.
        let data = words(&[
            MARKER_LINE_START,
            0,
            0x0001,
            0x0002,
            0x0003,
            MARKER_GAP,
            0xFFFE,
            0x0009,
            MARKER_IMAGE_END,
        ]);

        let frame = parse_image(&data).unwrap();
        assert_eq!(frame.height, 1);
        assert_eq!(frame.width, 3);
        assert_eq!(frame.pixels, vec![0x0001, 0x0009, 0x0003]);
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        assert!(parse_image(&[]).is_none());
        assert!(parse_image(&words(&[MARKER_NOP, MARKER_IMAGE_END])).is_none());
        // A line with only gaps has no segments and is dropped.
        assert!(parse_image(&words(&[MARKER_LINE_START, 0, MARKER_GAP, 5])).is_none());
    }
}
