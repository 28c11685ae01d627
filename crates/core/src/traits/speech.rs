//! Speech synthesis capability

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{AudioClip, SpeechParams};

/// Text-to-speech backend
///
/// Implementations:
/// - `OpenAISpeech` - `/v1/audio/speech`
/// - `ElevenLabsSpeech` - `/v1/text-to-speech/{voice_id}`
/// - `HttpSpeech` - any JSON-in, audio-out endpoint (Piper, Coqui servers)
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Registry name of this provider
    fn name(&self) -> &str;

    /// Synthesize `text` into a single audio clip
    async fn synthesize_speech(
        &self,
        text: &str,
        params: &SpeechParams,
    ) -> Result<AudioClip, ProviderError>;

    /// Lightweight health probe used for availability reporting
    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentSpeech;

    #[async_trait]
    impl SpeechSynthesizer for SilentSpeech {
        fn name(&self) -> &str {
            "silent"
        }

        async fn synthesize_speech(
            &self,
            text: &str,
            _params: &SpeechParams,
        ) -> Result<AudioClip, ProviderError> {
            Ok(AudioClip::new(vec![0; text.len()], "audio/pcm"))
        }
    }

    #[tokio::test]
    async fn test_synthesize() {
        let tts = SilentSpeech;
        let clip = tts
            .synthesize_speech("Em đây", &SpeechParams::default())
            .await
            .unwrap();
        assert_eq!(clip.data.len(), "Em đây".len());
        assert_eq!(clip.extension(), "pcm");
    }
}
