use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Model zoo entry as reported by the `modelzoo` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: usize,
    pub name: String,
    #[serde(rename = "W")]
    pub width: i32,
    #[serde(rename = "H")]
    pub height: i32,
    #[serde(rename = "C")]
    pub color_depth: i32,
    #[serde(rename = "N")]
    pub frame_depth: i32,
    #[serde(rename = "DeviceType")]
    pub device_type: String,
    #[serde(rename = "RuntimeAgent")]
    pub runtime_agent: String,
    #[serde(rename = "Quantized")]
    pub model_quantized: bool,
    #[serde(rename = "Pruned")]
    pub model_pruned: bool,
    #[serde(rename = "InputType")]
    pub input_type: String,
    #[serde(rename = "InputTensorLayout")]
    pub input_tensor_layout: String,
    #[serde(rename = "InputColorSpace")]
    pub input_color_space: String,
    #[serde(rename = "InputImageFormat")]
    pub input_image_format: String,
    #[serde(rename = "InputRawDataType")]
    pub input_raw_data_type: String,
    /// Extended model parameters; the server sends them as JSON text.
    #[serde(
        rename = "ModelParams",
        default,
        deserialize_with = "deserialize_model_params"
    )]
    pub extended_params: Value,
}

fn deserialize_model_params<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
        Value::String(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        other => Ok(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    Yes,
    No,
    #[default]
    DontCare,
}

impl TriState {
    fn accepts(self, value: bool) -> bool {
        match self {
            TriState::Yes => value,
            TriState::No => !value,
            TriState::DontCare => true,
        }
    }
}

/// Criteria for picking a model out of a model zoo listing.
#[derive(Debug, Clone, Default)]
pub struct ModelQuery {
    /// Any part of the model name, matched case-insensitively.
    pub model_name: String,
    /// Empty means any device.
    pub device_type: String,
    /// Empty means any runtime agent.
    pub runtime_agent: String,
    pub model_quantized: TriState,
    pub model_pruned: TriState,
}

impl ModelQuery {
    pub fn by_name(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, model: &ModelInfo) -> bool {
        model
            .name
            .to_lowercase()
            .contains(&self.model_name.to_lowercase())
            && (self.device_type.is_empty()
                || model.device_type.eq_ignore_ascii_case(&self.device_type))
            && (self.runtime_agent.is_empty()
                || model.runtime_agent.eq_ignore_ascii_case(&self.runtime_agent))
            && self.model_quantized.accepts(model.model_quantized)
            && self.model_pruned.accepts(model.model_pruned)
    }

    /// First model in `models` matching the query.
    pub fn find<'a>(&self, models: &'a [ModelInfo]) -> Option<&'a ModelInfo> {
        models.iter().find(|model| self.matches(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn zoo_entry(id: usize, name: &str, device: &str, quantized: bool) -> Value {
        json!({
            "id": id,
            "name": name,
            "W": 640, "H": 640, "C": 3, "N": 1,
            "DeviceType": device,
            "RuntimeAgent": "N2X",
            "Quantized": quantized,
            "Pruned": false,
            "InputType": "Image",
            "InputTensorLayout": "NHWC",
            "InputColorSpace": "RGB",
            "InputImageFormat": "JPEG",
            "InputRawDataType": "DG_UINT8",
            "ModelParams": "{\"PRE_PROCESS\": [{\"InputN\": 1}]}"
        })
    }

    fn zoo() -> Vec<ModelInfo> {
        vec![
            serde_json::from_value(zoo_entry(0, "yolo_v5s_coco--512x512_float_cpu", "CPU", false))
                .unwrap(),
            serde_json::from_value(zoo_entry(1, "yolo_v5s_coco--512x512_quant_orca", "ORCA", true))
                .unwrap(),
        ]
    }

    #[test]
    fn test_model_info_decodes_zoo_entry() {
        let models = zoo();
        assert_eq!(models[1].id, 1);
        assert_eq!(models[1].width, 640);
        assert_eq!(models[1].device_type, "ORCA");
        assert!(models[1].model_quantized);
        assert_eq!(models[1].extended_params["PRE_PROCESS"][0]["InputN"], 1);
    }

    #[test]
    fn test_query_matches_name_fragment_case_insensitively() {
        let models = zoo();
        let found = ModelQuery::by_name("YOLO_V5S").find(&models).unwrap();
        assert_eq!(found.id, 0);
    }

    #[test]
    fn test_query_filters_on_device_and_quantization() {
        let models = zoo();
        let query = ModelQuery {
            model_name: "coco".into(),
            device_type: "orca".into(),
            ..Default::default()
        };
        assert_eq!(query.find(&models).unwrap().id, 1);

        let query = ModelQuery {
            model_name: "coco".into(),
            model_quantized: TriState::No,
            ..Default::default()
        };
        assert_eq!(query.find(&models).unwrap().id, 0);

        let query = ModelQuery {
            model_name: "coco".into(),
            device_type: "GPU".into(),
            ..Default::default()
        };
        assert!(query.find(&models).is_none());
    }
}
