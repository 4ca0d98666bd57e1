use crate::error::{Result, SimPatientError};
use serde::{Deserialize, Serialize};

/// One scripted exchange: what the learner may ask and what the patient says
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    #[serde(alias = "q")]
    pub question: String,
    #[serde(alias = "a")]
    pub answer: String,
}

impl QaPair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Ordered, non-empty patient script; entry 0 is the opening line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QaPair>", into = "Vec<QaPair>")]
pub struct Script {
    pairs: Vec<QaPair>,
}

impl Script {
    pub fn new(pairs: Vec<QaPair>) -> Result<Self> {
        if pairs.is_empty() {
            return Err(SimPatientError::EmptyCorpus {
                collection: "script".to_string(),
            });
        }
        Ok(Self { pairs })
    }

    /// Parse a dialog JSON document: an array of `{question, answer}` objects
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SimPatientError::Json {
            source: e,
            context: "Failed to parse dialog script".to_string(),
        })
    }

    pub fn pairs(&self) -> &[QaPair] {
        &self.pairs
    }

    pub fn get(&self, index: usize) -> Option<&QaPair> {
        self.pairs.get(index)
    }

    /// Question texts in script order
    pub fn questions(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.question.clone()).collect()
    }

    /// The patient's first line
    pub fn opening(&self) -> &str {
        &self.pairs[0].answer
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl TryFrom<Vec<QaPair>> for Script {
    type Error = SimPatientError;

    fn try_from(pairs: Vec<QaPair>) -> Result<Self> {
        Script::new(pairs)
    }
}

impl From<Script> for Vec<QaPair> {
    fn from(script: Script) -> Self {
        script.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_keys() {
        let script = Script::from_json(r#"[{"q":"How are you?","a":"I feel fine."}]"#).unwrap();
        assert_eq!(script.len(), 1);
        assert_eq!(script.opening(), "I feel fine.");
        assert_eq!(script.questions(), vec!["How are you?".to_string()]);
    }

    #[test]
    fn test_parse_long_keys() {
        let json = r#"[
            {"question": "What brings you in?", "answer": "My chest hurts."},
            {"question": "Since when?", "answer": "Two days ago."}
        ]"#;
        let script = Script::from_json(json).unwrap();
        assert_eq!(script.get(1).unwrap().answer, "Two days ago.");
    }

    #[test]
    fn test_empty_script_rejected() {
        assert!(Script::new(Vec::new()).is_err());
        assert!(Script::from_json("[]").is_err());
    }

    #[test]
    fn test_serializes_as_array() {
        let script = Script::new(vec![QaPair::new("q1", "a1")]).unwrap();
        let json = serde_json::to_value(&script).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["answer"], "a1");
    }
}
