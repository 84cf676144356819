//! Wire shapes for both channels.
//!
//! The duplex channel carries a job-creation envelope outbound and
//! `image`/`error` events inbound. The chunked channel carries
//! newline-delimited, optionally `data:`-prefixed JSON records terminated
//! by a `[DONE]` line.

use serde::{Deserialize, Serialize};

/// Fixed birth date submitted by the age-verification side call.
pub const BIRTH_DATE: &str = "2001-01-01T16:00:00.000Z";

// ============================================================================
// Duplex channel: outbound job creation
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct JobCreateEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: i64,
    item: JobItem,
}

#[derive(Debug, Clone, Serialize)]
struct JobItem {
    #[serde(rename = "type")]
    kind: &'static str,
    content: Vec<JobContent>,
}

#[derive(Debug, Clone, Serialize)]
struct JobContent {
    #[serde(rename = "requestId")]
    request_id: String,
    text: String,
    #[serde(rename = "type")]
    kind: &'static str,
    properties: JobProperties,
}

/// Properties object on the job-creation envelope. The video fields are
/// only populated for video-over-duplex jobs; the service accepts several
/// aliases for duration and resolution, so all of them are sent.
#[derive(Debug, Clone, Serialize)]
pub struct JobProperties {
    section_count: u32,
    is_kids_mode: bool,
    enable_nsfw: bool,
    skip_upsampler: bool,
    is_initial: bool,
    aspect_ratio: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    is_video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_resolution: Option<String>,
}

impl JobProperties {
    fn image(aspect_ratio: &str, enable_nsfw: bool) -> Self {
        Self {
            section_count: 0,
            is_kids_mode: false,
            enable_nsfw,
            skip_upsampler: false,
            is_initial: false,
            aspect_ratio: aspect_ratio.to_string(),
            is_video: None,
            mode: None,
            generation_type: None,
            output_type: None,
            duration_seconds: None,
            video_duration_seconds: None,
            duration: None,
            resolution: None,
            video_resolution: None,
            target_resolution: None,
        }
    }

    fn video(aspect_ratio: &str, enable_nsfw: bool, duration_seconds: u32, resolution: &str) -> Self {
        Self {
            is_video: Some(true),
            mode: Some("video"),
            generation_type: Some("video"),
            output_type: Some("video"),
            duration_seconds: Some(duration_seconds),
            video_duration_seconds: Some(duration_seconds),
            duration: Some(duration_seconds),
            resolution: Some(resolution.to_string()),
            video_resolution: Some(resolution.to_string()),
            target_resolution: Some(resolution.to_string()),
            ..Self::image(aspect_ratio, enable_nsfw)
        }
    }
}

impl JobCreateEnvelope {
    pub fn image(prompt: &str, request_id: &str, aspect_ratio: &str, enable_nsfw: bool) -> Self {
        Self::with_properties(prompt, request_id, JobProperties::image(aspect_ratio, enable_nsfw))
    }

    pub fn video(
        prompt: &str,
        request_id: &str,
        aspect_ratio: &str,
        enable_nsfw: bool,
        duration_seconds: u32,
        resolution: &str,
    ) -> Self {
        Self::with_properties(
            prompt,
            request_id,
            JobProperties::video(aspect_ratio, enable_nsfw, duration_seconds, resolution),
        )
    }

    fn with_properties(prompt: &str, request_id: &str, properties: JobProperties) -> Self {
        Self {
            kind: "conversation.item.create",
            timestamp: chrono::Utc::now().timestamp_millis(),
            item: JobItem {
                kind: "message",
                content: vec![JobContent {
                    request_id: request_id.to_string(),
                    text: prompt.to_string(),
                    kind: "input_text",
                    properties,
                }],
            },
        }
    }
}

// ============================================================================
// Duplex channel: inbound events
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    Image {
        #[serde(default)]
        blob: String,
        #[serde(default)]
        url: String,
    },
    Error {
        #[serde(default)]
        err_code: String,
        #[serde(default)]
        err_msg: String,
    },
    /// Event kinds this client does not track.
    #[serde(other)]
    Other,
}

// ============================================================================
// Video post creation
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPostCreate {
    media_type: &'static str,
    prompt: String,
}

impl MediaPostCreate {
    pub fn video(prompt: &str) -> Self {
        Self {
            media_type: "MEDIA_POST_TYPE_VIDEO",
            prompt: prompt.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MediaPostResponse {
    #[serde(default)]
    pub post: Option<MediaPost>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPost {
    #[serde(default)]
    pub id: String,
}

// ============================================================================
// Video chat payload
// ============================================================================

/// Named creative presets, each mapped to a fixed mode flag appended to the
/// prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoPreset {
    Fun,
    Normal,
    Spicy,
    Custom,
}

impl Default for VideoPreset {
    fn default() -> Self {
        VideoPreset::Normal
    }
}

impl VideoPreset {
    pub fn mode_flag(self) -> &'static str {
        match self {
            VideoPreset::Fun => "--mode=extremely-crazy",
            VideoPreset::Normal => "--mode=normal",
            VideoPreset::Spicy => "--mode=extremely-spicy-or-crazy",
            VideoPreset::Custom => "--mode=custom",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoChatPayload {
    device_env_info: DeviceEnvInfo,
    disable_memory: bool,
    disable_search: bool,
    disable_self_harm_short_circuit: bool,
    disable_text_follow_ups: bool,
    enable_image_generation: bool,
    enable_image_streaming: bool,
    enable_side_by_side: bool,
    file_attachments: Vec<String>,
    force_concise: bool,
    force_side_by_side: bool,
    image_attachments: Vec<String>,
    image_generation_count: u32,
    is_async_chat: bool,
    is_reasoning: bool,
    message: String,
    model_mode: Option<String>,
    model_name: &'static str,
    response_metadata: ResponseMetadata,
    return_image_bytes: bool,
    return_raw_grok_in_xai_request: bool,
    send_final_metadata: bool,
    temporary: bool,
    tool_overrides: ToolOverrides,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceEnvInfo {
    dark_mode_enabled: bool,
    device_pixel_ratio: u32,
    screen_width: u32,
    screen_height: u32,
    viewport_width: u32,
    viewport_height: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMetadata {
    request_model_details: RequestModelDetails,
    model_config_override: ModelConfigOverride,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestModelDetails {
    model_id: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelConfigOverride {
    model_map: ModelMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelMap {
    video_gen_model_config: VideoGenModelConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGenModelConfig {
    aspect_ratio: String,
    parent_post_id: String,
    resolution_name: String,
    video_length: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolOverrides {
    video_gen: bool,
}

const CHAT_MODEL: &str = "grok-3";

impl VideoChatPayload {
    pub fn new(
        prompt: &str,
        post_id: &str,
        aspect_ratio: &str,
        duration_seconds: u32,
        resolution: &str,
        preset: VideoPreset,
    ) -> Self {
        let message = format!("{prompt} {}", preset.mode_flag()).trim().to_string();

        Self {
            device_env_info: DeviceEnvInfo {
                dark_mode_enabled: false,
                device_pixel_ratio: 2,
                screen_width: 1920,
                screen_height: 1080,
                viewport_width: 1920,
                viewport_height: 980,
            },
            disable_memory: true,
            disable_search: false,
            disable_self_harm_short_circuit: false,
            disable_text_follow_ups: false,
            enable_image_generation: true,
            enable_image_streaming: true,
            enable_side_by_side: true,
            file_attachments: Vec::new(),
            force_concise: false,
            force_side_by_side: false,
            image_attachments: Vec::new(),
            image_generation_count: 2,
            is_async_chat: false,
            is_reasoning: false,
            message,
            model_mode: None,
            model_name: CHAT_MODEL,
            response_metadata: ResponseMetadata {
                request_model_details: RequestModelDetails {
                    model_id: CHAT_MODEL,
                },
                model_config_override: ModelConfigOverride {
                    model_map: ModelMap {
                        video_gen_model_config: VideoGenModelConfig {
                            aspect_ratio: aspect_ratio.to_string(),
                            parent_post_id: post_id.to_string(),
                            resolution_name: resolution.to_string(),
                            video_length: duration_seconds,
                        },
                    },
                },
            },
            return_image_bytes: false,
            return_raw_grok_in_xai_request: false,
            send_final_metadata: true,
            temporary: true,
            tool_overrides: ToolOverrides { video_gen: true },
        }
    }
}

// ============================================================================
// Video upscale
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleRequest {
    video_id: String,
}

impl UpscaleRequest {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpscaleResponse {
    #[serde(default, rename = "hdMediaUrl")]
    pub hd_media_url: Option<String>,
}

// ============================================================================
// Chunked stream records
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChunkRecord {
    #[serde(default)]
    result: Option<ChunkResult>,
}

#[derive(Debug, Deserialize)]
struct ChunkResult {
    #[serde(default)]
    response: Option<ChunkResponse>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "streamingVideoGenerationResponse")]
    video: Option<VideoProgressEvent>,
}

/// Nested progress object on the chunked stream. Reaching 100 with a
/// populated video URL marks completion.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct VideoProgressEvent {
    #[serde(default)]
    pub progress: i64,
    #[serde(default, rename = "videoUrl")]
    pub video_url: String,
    #[serde(default, rename = "thumbnailImageUrl")]
    pub thumbnail_image_url: String,
}

/// One parsed line of the chunked stream.
#[derive(Debug, PartialEq)]
pub enum StreamLine {
    /// Terminator line; stop consuming.
    Done,
    /// Blank, malformed, or carrying nothing this client tracks.
    Skip,
    /// A text token was produced (diagnostic only).
    Token,
    Video(VideoProgressEvent),
}

/// Parse a raw stream line. Malformed lines are never an error.
pub fn parse_stream_line(raw: &str) -> StreamLine {
    let mut line = raw.trim();
    if let Some(rest) = line.strip_prefix("data:") {
        line = rest.trim();
    }
    if line.is_empty() {
        return StreamLine::Skip;
    }
    if line == "[DONE]" {
        return StreamLine::Done;
    }

    let record: ChunkRecord = match serde_json::from_str(line) {
        Ok(record) => record,
        Err(_) => return StreamLine::Skip,
    };

    let response = match record.result.and_then(|r| r.response) {
        Some(response) => response,
        None => return StreamLine::Skip,
    };

    if let Some(video) = response.video {
        return StreamLine::Video(video);
    }
    if response.token.is_some_and(|t| !t.is_empty()) {
        return StreamLine::Token;
    }
    StreamLine::Skip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_envelope_shape() {
        let envelope = JobCreateEnvelope::image("a red fox", "req-1", "2:3", true);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        let content = &value["item"]["content"][0];
        assert_eq!(content["requestId"], "req-1");
        assert_eq!(content["text"], "a red fox");
        assert_eq!(content["type"], "input_text");
        assert_eq!(content["properties"]["aspect_ratio"], "2:3");
        assert_eq!(content["properties"]["enable_nsfw"], true);
        assert!(content["properties"].get("is_video").is_none());
    }

    #[test]
    fn test_video_envelope_carries_duration_aliases() {
        let envelope = JobCreateEnvelope::video("city at night", "req-2", "16:9", true, 6, "480p");
        let value = serde_json::to_value(&envelope).unwrap();
        let properties = &value["item"]["content"][0]["properties"];
        assert_eq!(properties["is_video"], true);
        assert_eq!(properties["duration_seconds"], 6);
        assert_eq!(properties["video_duration_seconds"], 6);
        assert_eq!(properties["target_resolution"], "480p");
    }

    #[test]
    fn test_channel_event_parsing() {
        let image: ChannelEvent =
            serde_json::from_str(r#"{"type":"image","blob":"abc","url":"https://x/images/1.png"}"#)
                .unwrap();
        assert_eq!(
            image,
            ChannelEvent::Image {
                blob: "abc".to_string(),
                url: "https://x/images/1.png".to_string()
            }
        );

        let error: ChannelEvent =
            serde_json::from_str(r#"{"type":"error","err_code":"rate_limit_exceeded","err_msg":"slow down"}"#)
                .unwrap();
        assert_eq!(
            error,
            ChannelEvent::Error {
                err_code: "rate_limit_exceeded".to_string(),
                err_msg: "slow down".to_string()
            }
        );

        let other: ChannelEvent = serde_json::from_str(r#"{"type":"session.created"}"#).unwrap();
        assert_eq!(other, ChannelEvent::Other);
    }

    #[test]
    fn test_chat_payload_references_post() {
        let payload = VideoChatPayload::new("waves", "post-9", "16:9", 6, "480p", VideoPreset::Spicy);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["message"], "waves --mode=extremely-spicy-or-crazy");
        let config = &value["responseMetadata"]["modelConfigOverride"]["modelMap"]
            ["videoGenModelConfig"];
        assert_eq!(config["parentPostId"], "post-9");
        assert_eq!(config["resolutionName"], "480p");
        assert_eq!(config["videoLength"], 6);
        assert_eq!(value["toolOverrides"]["videoGen"], true);
    }

    #[test]
    fn test_mode_flag_mapping() {
        assert_eq!(VideoPreset::Fun.mode_flag(), "--mode=extremely-crazy");
        assert_eq!(VideoPreset::Normal.mode_flag(), "--mode=normal");
        assert_eq!(VideoPreset::Custom.mode_flag(), "--mode=custom");
    }

    #[test]
    fn test_stream_line_parsing() {
        assert_eq!(parse_stream_line(""), StreamLine::Skip);
        assert_eq!(parse_stream_line("data: [DONE]"), StreamLine::Done);
        assert_eq!(parse_stream_line("not json at all"), StreamLine::Skip);
        assert_eq!(
            parse_stream_line(r#"{"result":{"response":{"token":"hi"}}}"#),
            StreamLine::Token
        );

        let line = r#"data: {"result":{"response":{"streamingVideoGenerationResponse":{"progress":100,"videoUrl":"https://x/v.mp4","thumbnailImageUrl":"https://x/t.jpg"}}}}"#;
        match parse_stream_line(line) {
            StreamLine::Video(event) => {
                assert_eq!(event.progress, 100);
                assert_eq!(event.video_url, "https://x/v.mp4");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_stream_line_missing_fields_default() {
        let line = r#"{"result":{"response":{"streamingVideoGenerationResponse":{}}}}"#;
        assert_eq!(
            parse_stream_line(line),
            StreamLine::Video(VideoProgressEvent::default())
        );
    }
}
