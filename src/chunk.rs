//! Overlapping, boundary-aware text splitter.
//!
//! Splits text into windows of at most `chunk_size` characters. Consecutive
//! windows share exactly `chunk_overlap` characters, so dropping the first
//! `chunk_overlap` characters of every chunk after the first and
//! concatenating gives back the original text.
//!
//! Each window tries to end just after a paragraph break, then a line break,
//! then a space. A boundary is only taken if it falls in the second half of
//! the window; otherwise the window is cut at exactly `chunk_size`.
//! Lengths are counted in `char`s, never bytes, so multi-byte text is never
//! split inside a code point.

use anyhow::{bail, Result};

const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into ordered chunks. Text that already fits is returned
    /// as a single chunk.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        if len <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.chunk_size).min(len);
            if hard_end == len {
                chunks.push(chars[start..len].iter().collect());
                break;
            }

            // The next window starts at `end - overlap`; it must move forward.
            let min_end = (start + self.chunk_overlap + 1).max(start + self.chunk_size / 2);
            let end = find_boundary(&chars, min_end, hard_end).unwrap_or(hard_end);

            chunks.push(chars[start..end].iter().collect());
            start = end - self.chunk_overlap;
        }

        chunks
    }
}

/// Latest position in `(min_end..=hard_end)` that sits right after a
/// separator, trying separators in priority order.
fn find_boundary(chars: &[char], min_end: usize, hard_end: usize) -> Option<usize> {
    for sep in SEPARATORS {
        let sep: Vec<char> = sep.chars().collect();
        let mut end = hard_end;
        while end >= min_end && end >= sep.len() {
            if chars[end - sep.len()..end] == sep[..] {
                return Some(end);
            }
            end -= 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(c);
            } else {
                out.extend(c.chars().skip(overlap));
            }
        }
        out
    }

    fn check_invariants(text: &str, size: usize, overlap: usize) -> Vec<String> {
        let splitter = TextSplitter::new(size, overlap).unwrap();
        let chunks = splitter.split(text);
        for c in &chunks {
            assert!(c.chars().count() <= size, "chunk longer than {}", size);
        }
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let tail: String = prev[prev.len() - overlap..].iter().collect();
            let head: String = pair[1].chars().take(overlap).collect();
            assert_eq!(tail, head, "overlap mismatch");
        }
        assert_eq!(reassemble(&chunks, overlap), text);
        chunks
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(100, 150).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(100, 99).is_ok());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = TextSplitter::new(50, 10).unwrap();
        assert_eq!(splitter.split("package main"), vec!["package main"]);
        assert_eq!(splitter.split(""), vec![""]);
    }

    #[test]
    fn boundary_free_text_has_fixed_stride() {
        let text = "x".repeat(120_000);
        let chunks = check_invariants(&text, 4000, 200);
        // ceil((120000 - 200) / (4000 - 200))
        assert_eq!(chunks.len(), 32);
        assert!(chunks[..31].iter().all(|c| c.len() == 4000));
    }

    #[test]
    fn prefers_line_boundaries() {
        let line = "fmt.Println(\"hello world\")\n";
        let text = line.repeat(400);
        let chunks = check_invariants(&text, 1000, 100);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.ends_with('\n'), "chunk did not end on a line: {:?}", &c[c.len() - 10..]);
        }
    }

    #[test]
    fn prefers_paragraphs_over_lines() {
        let para = format!("{}\n\n", "word ".repeat(30).trim_end());
        let text = para.repeat(40);
        let chunks = check_invariants(&text, 500, 50);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.ends_with("\n\n"));
        }
    }

    #[test]
    fn multibyte_text_splits_on_chars() {
        let text = "héllo wörld ✓ ".repeat(500);
        check_invariants(&text, 256, 32);
    }

    #[test]
    fn overlap_of_zero_partitions_text() {
        let text = "abc def ghi ".repeat(300);
        let chunks = check_invariants(&text, 100, 0);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn large_overlap_still_makes_progress() {
        let text = "a b c d e f g h ".repeat(200);
        let chunks = check_invariants(&text, 40, 39);
        assert!(chunks.len() > 1);
    }
}
