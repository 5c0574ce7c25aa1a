//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::image_gen::{ImageGenerator, JobProgress};
use crate::llm::TextModel;
use crate::vector_store::{ScoredPassage, VectorStore};

/// Answers each prompt with the response of the first rule whose needle it contains.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    rules: Vec<(String, String)>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_owned(), response.to_owned()));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| anyhow::anyhow!("no scripted response for prompt"))
    }
}

/// Image jobs that finish after a fixed number of polls.
#[derive(Default)]
pub(crate) struct FakeImages {
    polls_before_done: u32,
    never_finish: bool,
    submitted: Mutex<Vec<String>>,
    polls: Mutex<HashMap<String, u32>>,
}

impl FakeImages {
    pub(crate) fn new(polls_before_done: u32) -> Self {
        Self {
            polls_before_done,
            ..Self::default()
        }
    }

    pub(crate) fn stalled() -> Self {
        Self {
            never_finish: true,
            ..Self::default()
        }
    }

    pub(crate) fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn url_for(job_id: &str) -> String {
        format!("https://images.test/{job_id}.png")
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn submit(&self, prompt: &str) -> anyhow::Result<String> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(prompt.to_owned());
        Ok(format!("job-{}", submitted.len() - 1))
    }

    async fn poll(&self, job_id: &str) -> anyhow::Result<JobProgress> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(job_id.to_owned()).or_insert(0);
        *count += 1;
        if self.never_finish || *count <= self.polls_before_done {
            return Ok(JobProgress {
                progress: 40,
                image_urls: Vec::new(),
            });
        }
        Ok(JobProgress {
            progress: 100,
            image_urls: vec![Self::url_for(job_id)],
        })
    }
}

/// Returns the passages whose keyword appears in the query.
#[derive(Default)]
pub(crate) struct KeywordStore {
    passages: Vec<(String, ScoredPassage)>,
    searches: Mutex<Vec<String>>,
}

impl KeywordStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn passage(mut self, keyword: &str, content: &str, score: f32) -> Self {
        self.passages.push((
            keyword.to_lowercase(),
            ScoredPassage {
                content: content.to_owned(),
                score,
            },
        ));
        self
    }

    pub(crate) fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for KeywordStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ScoredPassage>> {
        self.searches.lock().unwrap().push(query.to_owned());
        let query = query.to_lowercase();
        let mut hits = self
            .passages
            .iter()
            .filter(|(keyword, _)| query.contains(keyword.as_str()))
            .map(|(_, passage)| passage.clone())
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }
}
