//! Shared test helpers.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use hospital_course::adapters::{GenerationError, Generator};
use hospital_course::core::RecordFormat;

type Responder = dyn Fn(usize, &str) -> Result<String, GenerationError> + Send + Sync;

/// Generator that answers from a closure and records every prompt it sees
pub struct ScriptedGenerator {
    responder: Box<Responder>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    /// `responder` gets the 0-based call index and the prompt
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &str) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answers call `i` with `DRAFT-i`
    pub fn numbered() -> Self {
        Self::new(|i, _| Ok(format!("DRAFT-{}", i)))
    }

    /// Answers every call with the same text
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let index = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len() - 1
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(index, prompt)
    }
}

/// Raw record with the default delimiters; `others` in stored (raw) order
pub fn raw_record(hp: &str, last: &str, others: &[&str]) -> String {
    raw_record_with(&RecordFormat::default(), hp, last, others)
}

pub fn raw_record_with(format: &RecordFormat, hp: &str, last: &str, others: &[&str]) -> String {
    let mut raw = format!(
        "MRN 0001\n{m}\n{hp}\n{m}\n{last}\n",
        m = format.marker,
        hp = hp,
        last = last
    );
    for note in others {
        raw.push_str(&format.next_note);
        raw.push('\n');
        raw.push_str(note);
        raw.push('\n');
    }
    raw
}
