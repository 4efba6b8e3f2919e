//! C bindings for nlprt.
//!
//! Models are addressed by `u64` handles; `0` means construction failed.
//! Every call that can fail takes a trailing `ErrorRecord **err` that is
//! set to null on success and to a fresh record on failure (pass null to
//! ignore errors). Results and error records are released with the matching
//! `nlprt_free_*` function.
//!
//! Callers must not free a handle while another thread is still inside a
//! call on it; a freed handle is rejected with code 5 afterwards.
//!
//! Default constructors read `NLPRT_CONFIG` (path to a runtime config JSON)
//! and `NLPRT_CACHE_DIR` (model cache override) from the environment.

#[cfg(not(any(feature = "tract", feature = "ort")))]
compile_error!("nlprt-ffi needs the `tract` or `ort` feature");

pub mod error;
pub mod handles;
pub mod records;

use std::ffi::{c_char, CStr, OsString};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr;

use lazy_static::lazy_static;
use libc::size_t;
use tracing::{debug, warn};

use nlprt_core::{
    Architecture, ArtifactPaths, BackendLoader, NerModel, PosModel, QaModel, RuntimeConfig,
    SentimentModel, SummarizationModel, TextGenerationModel, TranslationModel, ZeroShotModel,
};

use error::{FfiError, Result};
use handles::HandleTable;
use records::{
    boxed, release, ErrorRecord, NerResult, PosResult, QaResult, SentimentResult,
    SummarizationResult, TextResult, ZeroShotResult,
};

#[cfg(all(feature = "ort", not(test)))]
type Loader = nlprt_core::OrtLoader;

#[cfg(all(feature = "tract", not(feature = "ort"), not(test)))]
type Loader = nlprt_core::TractLoader;

#[cfg(test)]
type Loader = nlprt_core::test_support::FixtureLoader;

type Backend = <Loader as BackendLoader>::Backend;

const CONFIG_ENV: &str = "NLPRT_CONFIG";
const CACHE_DIR_ENV: &str = "NLPRT_CACHE_DIR";

lazy_static! {
    static ref SENTIMENT: HandleTable<SentimentModel<Backend>> = HandleTable::new();
    static ref POS: HandleTable<PosModel<Backend>> = HandleTable::new();
    static ref NER: HandleTable<NerModel<Backend>> = HandleTable::new();
    static ref QA: HandleTable<QaModel<Backend>> = HandleTable::new();
    static ref SUMMARIZATION: HandleTable<SummarizationModel<Backend>> = HandleTable::new();
    static ref ZERO_SHOT: HandleTable<ZeroShotModel<Backend>> = HandleTable::new();
    static ref TRANSLATION: HandleTable<TranslationModel<Backend>> = HandleTable::new();
    static ref GENERATION: HandleTable<TextGenerationModel<Backend>> = HandleTable::new();
}

fn config_from(config_path: Option<OsString>, cache_dir: Option<OsString>) -> Result<RuntimeConfig> {
    let mut config = match config_path {
        Some(path) => RuntimeConfig::from_file(Path::new(&path))?,
        None => RuntimeConfig::default(),
    };
    if let Some(dir) = cache_dir {
        config.models.cache_dir = PathBuf::from(dir);
    }
    Ok(config)
}

fn runtime_config() -> Result<RuntimeConfig> {
    config_from(std::env::var_os(CONFIG_ENV), std::env::var_os(CACHE_DIR_ENV))
}

/// Borrow a required string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives the call.
unsafe fn read_str<'a>(ptr: *const c_char, name: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(FfiError::NullArgument(name));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiError::InvalidUtf8(name))
}

/// Like [`read_str`], but null and empty strings mean "not given".
unsafe fn read_optional_str<'a>(ptr: *const c_char, name: &'static str) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    let s = unsafe { read_str(ptr, name) }?;
    Ok((!s.is_empty()).then_some(s))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, translating failures into `fallback` plus an error record.
///
/// # Safety
/// `err` must be null or valid for a pointer write.
unsafe fn call<T>(err: *mut *mut ErrorRecord, fallback: T, f: impl FnOnce() -> Result<T>) -> T {
    if !err.is_null() {
        unsafe { *err = ptr::null_mut() };
    }
    let failure = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return value,
        Ok(Err(e)) => e,
        Err(payload) => FfiError::Panic(panic_message(payload)),
    };
    warn!("nlprt call failed: {}", failure);
    if !err.is_null() {
        unsafe { *err = boxed(ErrorRecord::encode(failure.code(), &failure.to_string())) };
    }
    fallback
}

/// Version of this library as a static NUL-terminated string.
#[unsafe(no_mangle)]
pub extern "C" fn nlprt_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}

/// Defines the default constructor, the from-files constructor and the
/// free function of one task.
macro_rules! model_lifecycle {
    ($task:literal, $table:ident, $model:ident, $new:ident, $from_files:ident, $free:ident) => {
        #[doc = concat!("Load the default ", $task, " model from the model cache.")]
        ///
        /// # Safety
        /// `err` must be null or valid for a pointer write.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $new(err: *mut *mut ErrorRecord) -> u64 {
            unsafe {
                call(err, 0, || {
                    let config = runtime_config()?;
                    let model = $model::new(&Loader::default(), &config)?;
                    let id = $table.insert(model);
                    debug!("Created {} model handle {}", $task, id);
                    Ok(id)
                })
            }
        }

        #[doc = concat!("Load a ", $task, " model from explicit artifact files.")]
        ///
        /// `merges` may be null or empty. `architecture` is a registry tag.
        ///
        /// # Safety
        /// String arguments must be null or NUL-terminated; `err` must be
        /// null or valid for a pointer write.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $from_files(
            weights: *const c_char,
            config: *const c_char,
            vocab: *const c_char,
            merges: *const c_char,
            architecture: i32,
            err: *mut *mut ErrorRecord,
        ) -> u64 {
            unsafe {
                call(err, 0, || {
                    let architecture = Architecture::from_tag(architecture)?;
                    let paths = ArtifactPaths::from_strs(
                        read_str(weights, "weights")?,
                        read_str(config, "config")?,
                        read_str(vocab, "vocab")?,
                        read_optional_str(merges, "merges")?.unwrap_or_default(),
                    );
                    let model =
                        $model::from_files(&Loader::default(), &paths, architecture, &runtime_config()?)?;
                    let id = $table.insert(model);
                    debug!("Created {} model handle {} ({})", $task, id, architecture);
                    Ok(id)
                })
            }
        }

        #[doc = concat!("Release a ", $task, " model. Unknown handles are ignored.")]
        #[unsafe(no_mangle)]
        pub extern "C" fn $free(handle: u64) {
            if $table.remove(handle) {
                debug!("Released {} model handle {}", $task, handle);
            }
        }
    };
}

model_lifecycle!(
    "sentiment",
    SENTIMENT,
    SentimentModel,
    nlprt_new_sentiment_model,
    nlprt_new_sentiment_model_from_files,
    nlprt_free_sentiment_model
);
model_lifecycle!(
    "POS",
    POS,
    PosModel,
    nlprt_new_pos_model,
    nlprt_new_pos_model_from_files,
    nlprt_free_pos_model
);
model_lifecycle!(
    "NER",
    NER,
    NerModel,
    nlprt_new_ner_model,
    nlprt_new_ner_model_from_files,
    nlprt_free_ner_model
);
model_lifecycle!(
    "question answering",
    QA,
    QaModel,
    nlprt_new_qa_model,
    nlprt_new_qa_model_from_files,
    nlprt_free_qa_model
);
model_lifecycle!(
    "summarization",
    SUMMARIZATION,
    SummarizationModel,
    nlprt_new_summarization_model,
    nlprt_new_summarization_model_from_files,
    nlprt_free_summarization_model
);
model_lifecycle!(
    "zero-shot",
    ZERO_SHOT,
    ZeroShotModel,
    nlprt_new_zero_shot_model,
    nlprt_new_zero_shot_model_from_files,
    nlprt_free_zero_shot_model
);
model_lifecycle!(
    "translation",
    TRANSLATION,
    TranslationModel,
    nlprt_new_translation_model,
    nlprt_new_translation_model_from_files,
    nlprt_free_translation_model
);
model_lifecycle!(
    "text generation",
    GENERATION,
    TextGenerationModel,
    nlprt_new_text_generation_model,
    nlprt_new_text_generation_model_from_files,
    nlprt_free_text_generation_model
);

/// # Safety
/// `text` must be null or NUL-terminated; `err` must be null or valid for a
/// pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_predict_sentiment(
    handle: u64,
    text: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut SentimentResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = SENTIMENT.get(handle)?;
            let sentiment = model.predict(read_str(text, "text")?)?;
            Ok(boxed(SentimentResult::encode(&sentiment)))
        })
    }
}

/// # Safety
/// See [`nlprt_predict_sentiment`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_predict_pos(
    handle: u64,
    text: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut PosResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = POS.get(handle)?;
            let tags = model.predict(read_str(text, "text")?)?;
            Ok(boxed(PosResult::encode(&tags)))
        })
    }
}

/// # Safety
/// See [`nlprt_predict_sentiment`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_predict_ner(
    handle: u64,
    text: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut NerResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = NER.get(handle)?;
            let entities = model.predict(read_str(text, "text")?)?;
            Ok(boxed(NerResult::encode(&entities)))
        })
    }
}

/// Answer offsets are byte positions into `context`.
///
/// # Safety
/// `question` and `context` must be null or NUL-terminated; `err` must be
/// null or valid for a pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_predict_qa(
    handle: u64,
    question: *const c_char,
    context: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut QaResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = QA.get(handle)?;
            let answers = model.predict(read_str(question, "question")?, read_str(context, "context")?)?;
            Ok(boxed(QaResult::encode(&answers)))
        })
    }
}

/// # Safety
/// See [`nlprt_predict_sentiment`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_summarize(
    handle: u64,
    text: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut SummarizationResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = SUMMARIZATION.get(handle)?;
            let summaries = model.summarize(read_str(text, "text")?)?;
            Ok(boxed(SummarizationResult::encode(&summaries)))
        })
    }
}

/// Score `text` against `count` candidate labels.
///
/// # Safety
/// `labels` must point to `count` NUL-terminated strings (it may be null
/// when `count` is 0); `err` must be null or valid for a pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_predict_zero_shot(
    handle: u64,
    text: *const c_char,
    labels: *const *const c_char,
    count: size_t,
    err: *mut *mut ErrorRecord,
) -> *mut ZeroShotResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = ZERO_SHOT.get(handle)?;
            let text = read_str(text, "text")?;
            let raw = match (labels.is_null(), count) {
                (_, 0) => &[][..],
                (true, _) => return Err(FfiError::NullArgument("labels")),
                (false, n) => std::slice::from_raw_parts(labels, n),
            };
            let labels = raw
                .iter()
                .map(|&label| read_str(label, "labels"))
                .collect::<Result<Vec<_>>>()?;
            let scored = model.predict(text, &labels)?;
            Ok(boxed(ZeroShotResult::encode(&scored)))
        })
    }
}

/// Translate `text` into `target`. `source` may be null or empty.
///
/// Languages are English names or ISO codes.
///
/// # Safety
/// String arguments must be null or NUL-terminated; `err` must be null or
/// valid for a pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_translate(
    handle: u64,
    text: *const c_char,
    source: *const c_char,
    target: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut TextResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = TRANSLATION.get(handle)?;
            let translated = model.translate(
                read_str(text, "text")?,
                read_optional_str(source, "source")?,
                read_optional_str(target, "target")?.unwrap_or_default(),
            )?;
            Ok(boxed(TextResult::encode(&translated)))
        })
    }
}

/// Continue `prompt`; `prefix` conditions the model without being echoed
/// and may be null.
///
/// # Safety
/// String arguments must be null or NUL-terminated; `err` must be null or
/// valid for a pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nlprt_generate_text(
    handle: u64,
    prompt: *const c_char,
    prefix: *const c_char,
    err: *mut *mut ErrorRecord,
) -> *mut TextResult {
    unsafe {
        call(err, ptr::null_mut(), || {
            let model = GENERATION.get(handle)?;
            let text = model.generate(read_str(prompt, "prompt")?, read_optional_str(prefix, "prefix")?)?;
            Ok(boxed(TextResult::encode(&text)))
        })
    }
}

macro_rules! record_free {
    ($($free:ident => $record:ty),* $(,)?) => {
        $(
            /// # Safety
            /// The pointer must be null or come from this library and not
            /// have been freed yet.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $free(record: *mut $record) {
                unsafe { release(record) }
            }
        )*
    };
}

record_free! {
    nlprt_free_sentiment_result => SentimentResult,
    nlprt_free_pos_result => PosResult,
    nlprt_free_ner_result => NerResult,
    nlprt_free_qa_result => QaResult,
    nlprt_free_summarization_result => SummarizationResult,
    nlprt_free_zero_shot_result => ZeroShotResult,
    nlprt_free_text_result => TextResult,
    nlprt_free_error => ErrorRecord,
}
