//! Fixed-layout result records handed across the C boundary.
//!
//! Every record owns its strings and arrays. Repeated fields carry an
//! explicit `count`; an empty result has a null array and a zero count.
//! Records are released by reboxing the outer pointer: the `Drop` impls
//! free exactly what [`encode`](SentimentResult::encode) allocated.

use std::ffi::{c_char, CString};
use std::ptr;

use libc::size_t;

/// Copy `s` into a fresh NUL-terminated buffer. Interior NULs are dropped.
pub(crate) fn to_c_string(s: &str) -> *mut c_char {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    match CString::new(bytes) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn free_c_string(s: &mut *mut c_char) {
    if !s.is_null() {
        // SAFETY: every non-null string in a record came from `to_c_string`.
        drop(unsafe { CString::from_raw(*s) });
        *s = ptr::null_mut();
    }
}

fn into_raw_array<T>(items: Vec<T>) -> (*mut T, size_t) {
    if items.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let count = items.len();
    (Box::into_raw(items.into_boxed_slice()).cast::<T>(), count)
}

fn free_array<T>(items: &mut *mut T, count: &mut size_t) {
    if !items.is_null() {
        // SAFETY: `items` and `count` came together from `into_raw_array`.
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(*items, *count)) });
    }
    *items = ptr::null_mut();
    *count = 0;
}

/// Move a record to the heap for the caller.
pub(crate) fn boxed<T>(record: T) -> *mut T {
    Box::into_raw(Box::new(record))
}

/// Release a record produced by [`boxed`]. Null is ignored.
///
/// # Safety
/// `record` must be null or a pointer returned by this crate for type `T`
/// that has not been released yet.
pub(crate) unsafe fn release<T>(record: *mut T) {
    if !record.is_null() {
        drop(unsafe { Box::from_raw(record) });
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SentimentResult {
    pub label: *mut c_char,
    pub score: f32,
}

impl SentimentResult {
    pub fn encode(sentiment: &nlprt_core::Sentiment) -> Self {
        Self {
            label: to_c_string(&sentiment.label),
            score: sentiment.score,
        }
    }
}

impl Drop for SentimentResult {
    fn drop(&mut self) {
        free_c_string(&mut self.label);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct PosTag {
    pub word: *mut c_char,
    pub score: f32,
    pub label: *mut c_char,
}

impl Drop for PosTag {
    fn drop(&mut self) {
        free_c_string(&mut self.word);
        free_c_string(&mut self.label);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct PosResult {
    pub tags: *mut PosTag,
    pub count: size_t,
}

impl PosResult {
    pub fn encode(tags: &[nlprt_core::PosTag]) -> Self {
        let tags = tags
            .iter()
            .map(|t| PosTag {
                word: to_c_string(&t.word),
                score: t.score,
                label: to_c_string(&t.label),
            })
            .collect();
        let (tags, count) = into_raw_array(tags);
        Self { tags, count }
    }
}

impl Drop for PosResult {
    fn drop(&mut self) {
        free_array(&mut self.tags, &mut self.count);
    }
}

/// A named entity; offsets are byte positions into the input text.
#[repr(C)]
#[derive(Debug)]
pub struct Entity {
    pub word: *mut c_char,
    pub score: f32,
    pub label: *mut c_char,
    pub offset_begin: size_t,
    pub offset_end: size_t,
}

impl Drop for Entity {
    fn drop(&mut self) {
        free_c_string(&mut self.word);
        free_c_string(&mut self.label);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct NerResult {
    pub entities: *mut Entity,
    pub count: size_t,
}

impl NerResult {
    pub fn encode(entities: &[nlprt_core::Entity]) -> Self {
        let entities = entities
            .iter()
            .map(|e| Entity {
                word: to_c_string(&e.word),
                score: e.score,
                label: to_c_string(&e.label),
                offset_begin: e.offset.begin,
                offset_end: e.offset.end,
            })
            .collect();
        let (entities, count) = into_raw_array(entities);
        Self { entities, count }
    }
}

impl Drop for NerResult {
    fn drop(&mut self) {
        free_array(&mut self.entities, &mut self.count);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct QaAnswer {
    pub score: f64,
    pub start: size_t,
    pub end: size_t,
    pub answer: *mut c_char,
}

impl Drop for QaAnswer {
    fn drop(&mut self) {
        free_c_string(&mut self.answer);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct QaResult {
    pub answers: *mut QaAnswer,
    pub count: size_t,
}

impl QaResult {
    pub fn encode(answers: &[nlprt_core::Answer]) -> Self {
        let answers = answers
            .iter()
            .map(|a| QaAnswer {
                score: f64::from(a.score),
                start: a.start,
                end: a.end,
                answer: to_c_string(&a.answer),
            })
            .collect();
        let (answers, count) = into_raw_array(answers);
        Self { answers, count }
    }
}

impl Drop for QaResult {
    fn drop(&mut self) {
        free_array(&mut self.answers, &mut self.count);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SummarizationResult {
    pub summaries: *mut *mut c_char,
    pub count: size_t,
}

impl SummarizationResult {
    pub fn encode(summaries: &[String]) -> Self {
        let summaries = summaries.iter().map(|s| to_c_string(s)).collect();
        let (summaries, count) = into_raw_array(summaries);
        Self { summaries, count }
    }
}

impl Drop for SummarizationResult {
    fn drop(&mut self) {
        if !self.summaries.is_null() {
            // SAFETY: the array came from `into_raw_array` with this count.
            let strings = unsafe { std::slice::from_raw_parts_mut(self.summaries, self.count) };
            strings.iter_mut().for_each(free_c_string);
        }
        free_array(&mut self.summaries, &mut self.count);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct ZeroShotLabel {
    pub text: *mut c_char,
    pub score: f64,
}

impl Drop for ZeroShotLabel {
    fn drop(&mut self) {
        free_c_string(&mut self.text);
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct ZeroShotResult {
    pub labels: *mut ZeroShotLabel,
    pub count: size_t,
}

impl ZeroShotResult {
    pub fn encode(labels: &[nlprt_core::ZeroShotLabel]) -> Self {
        let labels = labels
            .iter()
            .map(|l| ZeroShotLabel {
                text: to_c_string(&l.text),
                score: l.score,
            })
            .collect();
        let (labels, count) = into_raw_array(labels);
        Self { labels, count }
    }
}

impl Drop for ZeroShotResult {
    fn drop(&mut self) {
        free_array(&mut self.labels, &mut self.count);
    }
}

/// Single string output of translation and text generation.
#[repr(C)]
#[derive(Debug)]
pub struct TextResult {
    pub text: *mut c_char,
}

impl TextResult {
    pub fn encode(text: &str) -> Self {
        Self {
            text: to_c_string(text),
        }
    }
}

impl Drop for TextResult {
    fn drop(&mut self) {
        free_c_string(&mut self.text);
    }
}

/// Failure reported through the `err` out parameter.
#[repr(C)]
#[derive(Debug)]
pub struct ErrorRecord {
    pub code: i32,
    pub message: *mut c_char,
}

impl ErrorRecord {
    pub fn encode(code: i32, message: &str) -> Self {
        Self {
            code,
            message: to_c_string(message),
        }
    }
}

impl Drop for ErrorRecord {
    fn drop(&mut self) {
        free_c_string(&mut self.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlprt_core::Span;
    use pretty_assertions::assert_eq;
    use std::ffi::CStr;

    fn read(s: *const c_char) -> String {
        assert!(!s.is_null());
        unsafe { CStr::from_ptr(s) }.to_str().unwrap().to_string()
    }

    #[test]
    fn test_interior_nul_is_stripped() {
        let s = to_c_string("Pa\0ris");
        assert_eq!(read(s), "Paris");
        let mut s = s;
        free_c_string(&mut s);
        assert!(s.is_null());
    }

    #[test]
    fn test_ner_result_layout() {
        let entities = vec![
            nlprt_core::Entity {
                word: "Amy".to_string(),
                label: "PER".to_string(),
                score: 0.9,
                offset: Span { begin: 0, end: 3 },
            },
            nlprt_core::Entity {
                word: "Google".to_string(),
                label: "ORG".to_string(),
                score: 0.8,
                offset: Span { begin: 20, end: 26 },
            },
        ];
        let record = boxed(NerResult::encode(&entities));
        let result = unsafe { &*record };
        assert_eq!(result.count, 2);

        let items = unsafe { std::slice::from_raw_parts(result.entities, result.count) };
        assert_eq!(read(items[1].word), "Google");
        assert_eq!(read(items[1].label), "ORG");
        assert_eq!((items[1].offset_begin, items[1].offset_end), (20, 26));

        unsafe { release(record) };
    }

    #[test]
    fn test_empty_result_has_null_array() {
        let record = QaResult::encode(&[]);
        assert!(record.answers.is_null());
        assert_eq!(record.count, 0);

        let record = SummarizationResult::encode(&[]);
        assert!(record.summaries.is_null());
    }

    #[test]
    fn test_summaries_are_owned_copies() {
        let source = vec!["the cat".to_string(), "the cat sat".to_string()];
        let record = SummarizationResult::encode(&source);
        drop(source);

        let strings = unsafe { std::slice::from_raw_parts(record.summaries, record.count) };
        let texts: Vec<String> = strings.iter().map(|s| read(*s)).collect();
        assert_eq!(texts, vec!["the cat", "the cat sat"]);
    }

    #[test]
    fn test_zero_shot_scores_keep_precision() {
        let labels = vec![nlprt_core::ZeroShotLabel {
            text: "politics".to_string(),
            score: 0.123_456_789_012,
        }];
        let record = ZeroShotResult::encode(&labels);
        let items = unsafe { std::slice::from_raw_parts(record.labels, record.count) };
        assert_eq!(items[0].score, 0.123_456_789_012);
        assert_eq!(read(items[0].text), "politics");
    }

    #[test]
    fn test_release_ignores_null() {
        unsafe { release::<ErrorRecord>(ptr::null_mut()) };
    }
}
