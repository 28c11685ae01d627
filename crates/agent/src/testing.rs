//! Scripted providers for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use companion_core::{
    AudioClip, GenerationParams, Prompt, ProviderError, SpeechParams, SpeechSynthesizer,
    TextGenerator,
};
use companion_llm::ProviderRegistry;

pub struct ScriptedText {
    name: &'static str,
    reply: Result<&'static str, ProviderError>,
    pub calls: AtomicUsize,
}

impl ScriptedText {
    pub fn ok(name: &'static str, reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Ok(reply),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Err(ProviderError::Unavailable("down".to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedText {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate_text(
        &self,
        _prompt: &Prompt,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map(str::to_string)
    }
}

pub struct ScriptedSpeech {
    name: &'static str,
    fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedSpeech {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSpeech {
    fn name(&self) -> &str {
        self.name
    }

    async fn synthesize_speech(
        &self,
        text: &str,
        _params: &SpeechParams,
    ) -> Result<AudioClip, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Api {
                status: 500,
                message: "tts crashed".to_string(),
            });
        }
        Ok(AudioClip::new(text.as_bytes().to_vec(), "audio/mpeg"))
    }
}

/// Registry ranked in list order
pub fn registry(
    text: Vec<Arc<ScriptedText>>,
    speech: Vec<Arc<ScriptedSpeech>>,
) -> ProviderRegistry {
    let mut builder = ProviderRegistry::builder();
    for (rank, provider) in text.into_iter().enumerate() {
        builder = builder.text_generator(rank as u32, provider);
    }
    for (rank, provider) in speech.into_iter().enumerate() {
        builder = builder.speech_synthesizer(rank as u32, provider);
    }
    builder.build().unwrap()
}
