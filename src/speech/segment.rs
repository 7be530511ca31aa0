//! Sentence segmentation for spoken playback and highlighting.
//!
//! A segment is either a run of text ending in at most one sentence mark, or
//! a lone `\n`. Segments tile the input exactly: offsets are byte offsets
//! into the original string, so `&text[seg.start..seg.end] == seg.text`.

use std::ops::Range;

/// A contiguous piece of prayer text spoken as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSegment<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl TextSegment<'_> {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_newline(&self) -> bool {
        self.text == "\n"
    }

    /// True when there is nothing worth sending to a synthesizer.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
            || self.text.chars().all(|c| c.is_whitespace() || is_sentence_mark(c))
    }
}

/// Sentence-ending marks: ASCII and full-width period, comma, question and
/// exclamation marks, plus the ideographic full stop.
pub fn is_sentence_mark(c: char) -> bool {
    matches!(c, '.' | ',' | '?' | '!' | '．' | '，' | '？' | '！' | '。')
}

/// Lazy segment iterator. Cloning restarts from the clone's position.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for Segments<'a> {
    type Item = TextSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.text[self.pos..];
        let first = rest.chars().next()?;
        let start = self.pos;

        let len = if first == '\n' {
            1
        } else {
            let mut end = rest.len();
            for (i, c) in rest.char_indices() {
                if c == '\n' {
                    end = i;
                    break;
                }
                if is_sentence_mark(c) {
                    end = i + c.len_utf8();
                    break;
                }
            }
            end
        };

        self.pos += len;
        Some(TextSegment {
            text: &self.text[start..self.pos],
            start,
            end: self.pos,
        })
    }
}

pub fn segments(text: &str) -> Segments<'_> {
    Segments { text, pos: 0 }
}

pub fn segment(text: &str) -> Vec<TextSegment<'_>> {
    segments(text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<&str> {
        segment(input).into_iter().map(|s| s.text).collect()
    }

    fn assert_tiles(input: &str) {
        let segs = segment(input);
        let mut expected_start = 0;
        for seg in &segs {
            assert!(!seg.text.is_empty());
            assert_eq!(seg.start, expected_start);
            assert_eq!(&input[seg.range()], seg.text);
            expected_start = seg.end;
        }
        assert_eq!(expected_start, input.len());
        assert_eq!(segs.iter().map(|s| s.text).collect::<String>(), input);
    }

    #[test]
    fn test_korean_sentences() {
        let input = "하나님 감사합니다. 사랑합니다!";
        let segs = segment(input);
        assert_eq!(texts(input), vec!["하나님 감사합니다.", " 사랑합니다!"]);
        assert_eq!(segs[0].range(), 0..26);
        assert_eq!(segs[1].range(), 26..input.len());
        let covered: usize = segs.iter().map(|s| s.end - s.start).sum();
        assert_eq!(covered, input.len());
    }

    #[test]
    fn test_newlines_are_own_segments() {
        let input = "주여,\n\n아멘";
        assert_eq!(texts(input), vec!["주여,", "\n", "\n", "아멘"]);
        let segs = segment(input);
        assert!(segs[1].is_newline());
        assert_eq!(segs[2].range(), 8..9);
    }

    #[test]
    fn test_full_width_marks() {
        assert_eq!(texts("감사，찬양。기도？"), vec!["감사，", "찬양。", "기도？"]);
        assert_eq!(texts("좋습니다！끝"), vec!["좋습니다！", "끝"]);
    }

    #[test]
    fn test_consecutive_marks_split() {
        assert_eq!(texts("아멘..."), vec!["아멘.", ".", "."]);
        assert_tiles("아멘...!?");
    }

    #[test]
    fn test_empty_and_unterminated() {
        assert!(segment("").is_empty());
        assert_eq!(texts("마침표 없음"), vec!["마침표 없음"]);
    }

    #[test]
    fn test_crlf() {
        assert_eq!(texts("주님.\r\n다시"), vec!["주님.", "\r", "\n", "다시"]);
    }

    #[test]
    fn test_at_most_one_trailing_mark() {
        let input = "\"여호와는 나의 목자시니\"\n\n찬양합니다, 주님! 왜요?? 네.\n끝";
        assert_tiles(input);
        let segs = segment(input);
        let last = segs.len() - 1;
        for (i, seg) in segs.iter().enumerate() {
            if seg.is_newline() {
                continue;
            }
            let marks = seg.text.chars().filter(|&c| is_sentence_mark(c)).count();
            assert!(marks <= 1, "{:?}", seg.text);
            if marks == 1 {
                assert!(is_sentence_mark(seg.text.chars().last().unwrap()));
            } else {
                let next_is_newline = segs.get(i + 1).is_some_and(|s| s.is_newline());
                assert!(i == last || next_is_newline);
            }
        }
    }

    #[test]
    fn test_restartable() {
        let input = "하나. 둘. 셋.";
        let iter = segments(input);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_blank_segments() {
        let segs = segment("가. . 나");
        assert_eq!(segs[1].text, " .");
        assert!(segs[1].is_blank());
        assert!(!segs[0].is_blank());
    }
}
