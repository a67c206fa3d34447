//! Local mirror of the conversation.
//!
//! Items keep the protocol's creation order and are indexed by id. Completed
//! items that carry audio are encoded to WAV once so a renderer can play them
//! back.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::core::audio::SAMPLE_RATE;
use crate::core::audio::base::{ms_to_samples, samples_to_ms};
use crate::core::realtime::{ItemEvent, ItemRole, ItemStatus, ItemType, ProtocolItem, ToolCall};

/// Playable WAV rendition of an item's audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub wav: Bytes,
    pub duration_ms: u64,
}

impl DecodedAudio {
    /// Encode mono PCM16 at 24kHz as a WAV file.
    pub fn encode(samples: &[i16]) -> Result<Self, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }

        Ok(Self {
            wav: Bytes::from(cursor.into_inner()),
            duration_ms: samples_to_ms(samples.len()),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormattedContent {
    pub text: String,
    pub transcript: String,
    pub audio: Vec<i16>,
    pub file: Option<Arc<DecodedAudio>>,
    pub tool: Option<ToolCall>,
    pub output: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationItem {
    pub id: String,
    pub role: Option<ItemRole>,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub formatted: FormattedContent,
}

impl ConversationItem {
    fn from_protocol(item: ProtocolItem, audio: Vec<i16>) -> Self {
        Self {
            id: item.id,
            role: item.role,
            item_type: item.item_type,
            status: item.status,
            formatted: FormattedContent {
                text: item.text,
                transcript: item.transcript,
                audio,
                file: None,
                tool: item.tool,
                output: item.output,
            },
        }
    }

    /// Encode the audio unless it already was.
    fn decode_audio(&mut self) {
        if self.formatted.file.is_some() || self.formatted.audio.is_empty() {
            return;
        }
        match DecodedAudio::encode(&self.formatted.audio) {
            Ok(file) => self.formatted.file = Some(Arc::new(file)),
            Err(e) => tracing::warn!(item = %self.id, "Failed to encode item audio: {}", e),
        }
    }

    pub fn view(&self) -> ItemView {
        ItemView {
            id: self.id.clone(),
            role: self.role,
            item_type: self.item_type,
            status: self.status,
            text: self.formatted.text.clone(),
            transcript: self.formatted.transcript.clone(),
            audio_ms: samples_to_ms(self.formatted.audio.len()),
            tool: self.formatted.tool.clone(),
            output: self.formatted.output.clone(),
            file: self.formatted.file.clone(),
        }
    }
}

/// Renderer-facing copy of an item without the raw samples.
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub id: String,
    pub role: Option<ItemRole>,
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub text: String,
    pub transcript: String,
    pub audio_ms: u64,
    pub tool: Option<ToolCall>,
    pub output: Option<String>,
    #[serde(skip)]
    pub file: Option<Arc<DecodedAudio>>,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    items: Vec<ConversationItem>,
    index: HashMap<String, usize>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ConversationItem> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    pub fn views(&self) -> Vec<ItemView> {
        self.items.iter().map(ConversationItem::view).collect()
    }

    /// Remove an item locally. Returns the removed item.
    pub fn remove(&mut self, id: &str) -> Option<ConversationItem> {
        let position = self.index.remove(id)?;
        let item = self.items.remove(position);
        for (i, item) in self.items.iter().enumerate().skip(position) {
            self.index.insert(item.id.clone(), i);
        }
        Some(item)
    }

    /// Apply a protocol notification. Returns `false` when nothing changed.
    pub fn apply(&mut self, event: ItemEvent) -> bool {
        match event {
            ItemEvent::Created {
                item, input_audio, ..
            } => {
                if self.contains(&item.id) {
                    tracing::debug!(item = %item.id, "Item already known");
                    return false;
                }
                let mut item = ConversationItem::from_protocol(item, input_audio.unwrap_or_default());
                if item.status == ItemStatus::Completed {
                    item.decode_audio();
                }
                self.index.insert(item.id.clone(), self.items.len());
                self.items.push(item);
                true
            }

            ItemEvent::TextDelta { item_id, delta } => {
                self.update(&item_id, |item| item.formatted.text.push_str(&delta))
            }

            ItemEvent::TranscriptDelta { item_id, delta } => {
                self.update(&item_id, |item| item.formatted.transcript.push_str(&delta))
            }

            ItemEvent::AudioDelta { item_id, samples } => {
                self.update(&item_id, |item| item.formatted.audio.extend_from_slice(&samples))
            }

            ItemEvent::ArgumentsDelta { item_id, delta } => self.update(&item_id, |item| {
                item.formatted
                    .tool
                    .get_or_insert_with(ToolCall::default)
                    .arguments
                    .push_str(&delta)
            }),

            ItemEvent::InputTranscript {
                item_id,
                transcript,
            } => self.update(&item_id, |item| item.formatted.transcript = transcript),

            ItemEvent::Completed { item: done } => self.update(&done.id.clone(), |item| {
                item.status = done.status;
                if let Some(tool) = done.tool {
                    item.formatted.tool = Some(tool);
                }
                if item.formatted.text.is_empty() {
                    item.formatted.text = done.text;
                }
                if item.formatted.transcript.is_empty() {
                    item.formatted.transcript = done.transcript;
                }
                if done.output.is_some() {
                    item.formatted.output = done.output;
                }
                item.decode_audio();
            }),

            ItemEvent::Truncated {
                item_id,
                audio_end_ms,
            } => self.update(&item_id, |item| {
                let end = ms_to_samples(u64::from(audio_end_ms));
                item.formatted.audio.truncate(end);
                item.formatted.transcript.clear();
                item.formatted.file = None;
                if item.status == ItemStatus::Completed {
                    item.decode_audio();
                }
            }),

            ItemEvent::Deleted { item_id } => self.remove(&item_id).is_some(),
        }
    }

    fn update(&mut self, id: &str, f: impl FnOnce(&mut ConversationItem)) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                f(&mut self.items[i]);
                true
            }
            None => {
                tracing::debug!(item = %id, "Notification for unknown item");
                false
            }
        }
    }
}
