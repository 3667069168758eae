//! 答案合成：引用解析与来源附注

pub mod answer;

pub use answer::{AnswerFormatter, FormattedAnswer, Source};
