//! Shared helpers for state-machine integration tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use about_time_core::{
    error::GenerationError,
    llm::{ChatRequest, Generator, Purpose},
    tone::FixedTone,
    AppConfig, Game,
};
use async_trait::async_trait;

pub const STORY: &str = "[체크포인트 1: 약속]\n민우는 카페에서 지연을 기다렸다. 지연은 늦었다.\n\n\
[체크포인트 2: 비]\n비가 내리는 밤, 민우는 우산 없이 지연을 데리러 갔다.\n\n\
[체크포인트 3: 다툼]\n민우가 먼저 화를 냈고 지연은 말없이 돌아섰다.\n\n\
[체크포인트 4: 밤길]\n지친 민우는 운전대를 잡았다.\n\n\
[엔딩: 이별]\n빗길에서 차가 미끄러졌고, 결국 지연은 눈을 감았다.";

pub const CAST_REPLY: &str = r#"{"characters": ["민우", "지연"], "victim": "지연"}"#;

/// A generator that answers by request purpose. Intervention replies are
/// consumed in order; the last one repeats once the queue runs dry.
pub struct ScriptedGenerator {
    story: String,
    cast: Result<String, ()>,
    replies: Mutex<VecDeque<String>>,
    ending: String,
    calls: Mutex<Vec<Purpose>>,
    ending_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            story: STORY.to_string(),
            cast: Ok(CAST_REPLY.to_string()),
            replies: Mutex::new(VecDeque::from(vec![
                "지연은 잠시 망설였다. <STATUS: neutral>".to_string()
            ])),
            ending: "결국 지연은 떠났다. <ENDING: failure>".to_string(),
            calls: Mutex::new(Vec::new()),
            ending_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_replies(self, replies: &[&str]) -> Self {
        *self.replies.lock().unwrap() = replies.iter().map(|reply| reply.to_string()).collect();
        self
    }

    pub fn with_ending(mut self, ending: &str) -> Self {
        self.ending = ending.to_string();
        self
    }

    /// Make the cast request fail so the frequency fallback runs.
    pub fn with_failing_cast(mut self) -> Self {
        self.cast = Err(());
        self
    }

    pub fn ending_calls(&self) -> usize {
        self.ending_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Purpose> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(request.purpose);
        match request.purpose {
            Purpose::Story => Ok(self.story.clone()),
            Purpose::Cast => self.cast.clone().map_err(|_| GenerationError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            }),
            Purpose::Intervention => {
                let mut replies = self.replies.lock().unwrap();
                let reply = if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                };
                Ok(reply.unwrap_or_default())
            }
            Purpose::Ending => {
                self.ending_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.ending.clone())
            }
        }
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        api_key: "test-key".to_string(),
        ..AppConfig::default()
    }
}

/// A game with a fixed tone draw and the scripted story installed.
pub async fn started_game(generator: &ScriptedGenerator) -> Game {
    let mut game = Game::new(&test_config()).with_tone_source(FixedTone(0.5));
    game.ensure_story(generator, None)
        .await
        .expect("story installs");
    game
}
