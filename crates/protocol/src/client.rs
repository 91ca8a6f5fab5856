//! Client → Server frames

use serde::{Deserialize, Serialize};

use crate::types::GenerationParams;

/// Frames sent from client to server over the push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Generate {
        request_id: String,
        content: String,
        params: GenerationParams,
    },
}

impl ClientFrame {
    pub fn request_id(&self) -> &str {
        match self {
            ClientFrame::Generate { request_id, .. } => request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientFrame;
    use crate::types::GenerationParams;

    #[test]
    fn serializes_generate_frame() {
        let frame = ClientFrame::Generate {
            request_id: "B".to_string(),
            content: "Explain recursion".to_string(),
            params: GenerationParams {
                model: Some("gpt-4o".to_string()),
                temperature: 0.3,
                top_p: 0.9,
                max_tokens: 256,
            },
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "generate");
        assert_eq!(json["request_id"], "B");
        assert_eq!(json["content"], "Explain recursion");
        assert_eq!(json["params"]["model"], "gpt-4o");
        assert_eq!(json["params"]["top_p"], 0.9);
        assert_eq!(json["params"]["max_tokens"], 256);
    }

    #[test]
    fn deserializes_generate_frame_with_default_params() {
        let json = r#"{"type":"generate","request_id":"A","content":"hi","params":{}}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::Generate {
                request_id, params, ..
            } => {
                assert_eq!(request_id, "A");
                assert_eq!(params, GenerationParams::default());
            }
        }
    }
}
