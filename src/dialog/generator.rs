/// Next-utterance selection for a virtual patient
use super::Script;
use crate::config::DialogConfig;
use crate::embedding::{EmbeddingProvider, SimilarityIndex};
use crate::error::Result;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fixed utterances used when the script cannot supply one
#[derive(Debug, Clone)]
pub struct DialogMessages {
    pub exhausted: String,
    pub clarification: String,
    pub apology: String,
}

impl From<&DialogConfig> for DialogMessages {
    fn from(config: &DialogConfig) -> Self {
        Self {
            exhausted: config.exhausted_message.clone(),
            clarification: config.clarification_message.clone(),
            apology: config.apology_message.clone(),
        }
    }
}

/// Where a reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Scripted answer
    Scripted,
    /// Sequential script already ran out
    Exhausted,
    /// Nothing in the script was close enough to the learner's input
    Clarification,
    /// Matched question had no scripted answer
    Apology,
}

/// One patient utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub kind: ReplyKind,
    /// Best question similarity, retrieval mode only
    pub similarity: Option<f32>,
}

/// Walks the script front to back, ignoring learner input
#[derive(Debug)]
pub struct SequentialDialog {
    script: Arc<Script>,
    cursor: usize,
    exhausted: String,
}

impl SequentialDialog {
    pub fn new(script: Arc<Script>, messages: &DialogMessages) -> Self {
        Self {
            script,
            cursor: 0,
            exhausted: messages.exhausted.clone(),
        }
    }

    /// Next scripted answer; the exhausted message forever once past the end
    pub fn next(&mut self) -> Reply {
        match self.script.get(self.cursor) {
            Some(pair) => {
                self.cursor += 1;
                Reply {
                    text: pair.answer.clone(),
                    kind: ReplyKind::Scripted,
                    similarity: None,
                }
            }
            None => Reply {
                text: self.exhausted.clone(),
                kind: ReplyKind::Exhausted,
                similarity: None,
            },
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.script.len()
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Answers whichever scripted question the learner's input is closest to
pub struct RetrievalDialog {
    script: Arc<Script>,
    index: Arc<SimilarityIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    question_map: AHashMap<String, usize>,
    match_threshold: f32,
    clarification: String,
    apology: String,
}

impl RetrievalDialog {
    /// `index` is expected to hold the script's questions; entries it holds
    /// that the script does not answer fall back to the apology message.
    pub fn new(
        script: Arc<Script>,
        index: Arc<SimilarityIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        match_threshold: f32,
        messages: &DialogMessages,
    ) -> Self {
        // Later duplicates of a question win.
        let question_map = script
            .pairs()
            .iter()
            .enumerate()
            .map(|(i, pair)| (pair.question.clone(), i))
            .collect();

        Self {
            script,
            index,
            provider,
            question_map,
            match_threshold,
            clarification: messages.clarification.clone(),
            apology: messages.apology.clone(),
        }
    }

    pub fn respond(&self, user_input: &str) -> Result<Reply> {
        let query = self.provider.embed(user_input)?;
        self.respond_to_vector(&query)
    }

    pub fn respond_to_vector(&self, query: &[f32]) -> Result<Reply> {
        let best = self.index.search(query, 1)?.into_iter().next();

        let best = match best {
            Some(hit) if hit.score >= self.match_threshold => hit,
            other => {
                let similarity = other.map(|h| h.score);
                tracing::debug!(
                    "No scripted question above {:.2} (best {:?})",
                    self.match_threshold,
                    similarity
                );
                return Ok(Reply {
                    text: self.clarification.clone(),
                    kind: ReplyKind::Clarification,
                    similarity,
                });
            }
        };

        match self.question_map.get(&best.text).and_then(|i| self.script.get(*i)) {
            Some(pair) => Ok(Reply {
                text: pair.answer.clone(),
                kind: ReplyKind::Scripted,
                similarity: Some(best.score),
            }),
            None => {
                tracing::warn!(
                    "Matched question '{}' missing from script of {} entries",
                    best.text,
                    self.script.len()
                );
                Ok(Reply {
                    text: self.apology.clone(),
                    kind: ReplyKind::Apology,
                    similarity: Some(best.score),
                })
            }
        }
    }

    pub fn match_threshold(&self) -> f32 {
        self.match_threshold
    }
}

/// Dialog generator, fixed to one mode for the life of a session
pub enum DialogGenerator {
    Sequential(SequentialDialog),
    Retrieval(RetrievalDialog),
}

impl DialogGenerator {
    /// Retrieval mode when a question index is supplied, sequential otherwise
    pub fn new(
        script: Arc<Script>,
        questions: Option<(Arc<SimilarityIndex>, Arc<dyn EmbeddingProvider>)>,
        match_threshold: f32,
        messages: &DialogMessages,
    ) -> Self {
        match questions {
            Some((index, provider)) => DialogGenerator::Retrieval(RetrievalDialog::new(
                script,
                index,
                provider,
                match_threshold,
                messages,
            )),
            None => DialogGenerator::Sequential(SequentialDialog::new(script, messages)),
        }
    }

    /// First patient line of the session.
    ///
    /// Sequential mode consumes script entry 0 so the following turn continues
    /// with entry 1.
    pub fn opening(&mut self) -> String {
        match self {
            DialogGenerator::Sequential(dialog) => dialog.next().text,
            DialogGenerator::Retrieval(dialog) => dialog.script.opening().to_string(),
        }
    }

    /// Next patient utterance for `user_input`
    pub fn next(&mut self, user_input: &str) -> Result<String> {
        Ok(self.reply(user_input)?.text)
    }

    pub fn reply(&mut self, user_input: &str) -> Result<Reply> {
        match self {
            DialogGenerator::Sequential(dialog) => Ok(dialog.next()),
            DialogGenerator::Retrieval(dialog) => dialog.respond(user_input),
        }
    }

    /// Like [`reply`](Self::reply) with the learner input already embedded
    pub fn reply_to_vector(&mut self, query: &[f32]) -> Result<Reply> {
        match self {
            DialogGenerator::Sequential(dialog) => Ok(dialog.next()),
            DialogGenerator::Retrieval(dialog) => dialog.respond_to_vector(query),
        }
    }

    pub fn reset(&mut self) {
        if let DialogGenerator::Sequential(dialog) = self {
            dialog.reset();
        }
    }

    /// Sequential position; always 0 in retrieval mode
    pub fn cursor(&self) -> usize {
        match self {
            DialogGenerator::Sequential(dialog) => dialog.cursor(),
            DialogGenerator::Retrieval(_) => 0,
        }
    }

    pub fn is_retrieval(&self) -> bool {
        matches!(self, DialogGenerator::Retrieval(_))
    }
}
