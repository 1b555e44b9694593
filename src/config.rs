use serde::Deserialize;
use std::path::{Path, PathBuf};

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("File not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default = "default_warmup")]
    pub warmup: bool,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_input_size() -> u32 {
    640
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_max_detections() -> usize {
    300
}

fn default_warmup() -> bool {
    true
}

impl ModelConfig {
    pub fn check_parameters(&self) -> Result<(), String> {
        if self.input_size == 0 {
            return Err("model.input_size must be greater than 0".to_string());
        }
        if !(0. ..=1.).contains(&self.min_probability) {
            return Err(format!(
                "model.min_probability must be within [0, 1], got {}",
                self.min_probability
            ));
        }
        if !(0. ..=1.).contains(&self.iou_threshold) {
            return Err(format!(
                "model.iou_threshold must be within [0, 1], got {}",
                self.iou_threshold
            ));
        }
        if self.max_detections == 0 {
            return Err("model.max_detections must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&configuration_directory, &environment)
}

/// Layers `base.yaml`, the environment file and `APP_*` variables, then
/// checks that the model and labels files exist.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = settings.try_deserialize::<Config>()?;

    for result in [
        config.model.check_parameters(),
        config.model.validate(),
        config.labels.validate(),
    ] {
        if let Err(e) = result {
            tracing::error!("Configuration validation failed: {}", e);
            return Err(config::ConfigError::Message(e));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BASE_YAML: &str = r#"
server:
  host: 0.0.0.0
  port: 8000
log_level: info
model:
  model_dir: MODEL_DIR
  onnx_file: best.onnx
labels:
  labels_dir: MODEL_DIR
  labels_file: labels.txt
"#;

    fn write_configuration(dir: &Path, with_model: bool) {
        write_configuration_with(dir, with_model, "log_level: debug\n");
    }

    fn write_configuration_with(dir: &Path, with_model: bool, local_yaml: &str) {
        let dir_str = dir.to_string_lossy();
        fs::write(
            dir.join("base.yaml"),
            BASE_YAML.replace("MODEL_DIR", &dir_str),
        )
        .unwrap();
        fs::write(dir.join("local.yaml"), local_yaml).unwrap();
        fs::write(dir.join("labels.txt"), "buffalo\nelephant\n").unwrap();
        if with_model {
            fs::write(dir.join("best.onnx"), b"onnx").unwrap();
        }
    }

    #[test]
    fn test_environment_parsing() {
        let env: Environment = "Production".to_string().try_into().unwrap();
        assert_eq!(env.as_str(), "production");
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        let level: LogLevel = "DEBUG".to_string().try_into().unwrap();
        assert_eq!(level.as_str(), "debug");
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_load_configuration_layers_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_configuration(dir.path(), true);

        let config = load_configuration(dir.path(), &Environment::Local).unwrap();

        assert_eq!(config.server.get_address(), "0.0.0.0:8000");
        assert_eq!(config.server.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.log_level.as_str(), "debug");
        assert_eq!(config.model.input_size, 640);
        assert_eq!(config.model.max_detections, 300);
        assert!((config.model.min_probability - 0.25).abs() < f32::EPSILON);
        assert!((config.model.iou_threshold - 0.7).abs() < f32::EPSILON);
        assert!(config.model.warmup);
        assert_eq!(config.model.get_path(), dir.path().join("best.onnx"));
    }

    #[test]
    fn test_out_of_range_model_parameters_are_rejected() {
        let overrides = [
            "model:\n  input_size: 0\n",
            "model:\n  min_probability: 1.5\n",
            "model:\n  iou_threshold: -0.1\n",
            "model:\n  max_detections: 0\n",
        ];

        for local_yaml in overrides {
            let dir = tempfile::tempdir().unwrap();
            write_configuration_with(dir.path(), true, local_yaml);

            let result = load_configuration(dir.path(), &Environment::Local);

            assert!(result.is_err(), "accepted {:?}", local_yaml);
        }
    }

    #[test]
    fn test_missing_model_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_configuration(dir.path(), false);

        let result = load_configuration(dir.path(), &Environment::Production);

        assert!(result.is_err());
    }
}
