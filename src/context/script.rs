/// Structured build script
///
/// The script is an ordered list of typed steps, validated when each step is
/// added and rendered to Dockerfile text only at the boundary. Every operand is
/// written in JSON-array form with JSON string escaping, so paths and commands
/// cannot terminate a directive or inject a new one.
use crate::config::types::{Result, SandboxError};
use crate::validate::validate_relative_path;

/// Working directory of the test suite inside the image
pub const WORKDIR: &str = "/test";

/// One build directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    From { image: String },
    Workdir { path: String },
    Copy { src: String, dest: String },
    Run { command: String, tolerate_failure: bool },
    Cmd { argv: Vec<String> },
}

impl BuildStep {
    fn render(&self) -> String {
        match self {
            BuildStep::From { image } => format!("FROM {}", image),
            BuildStep::Workdir { path } => format!("WORKDIR {}", quote(path)),
            BuildStep::Copy { src, dest } => {
                format!("COPY [{}, {}]", quote(src), quote(dest))
            }
            BuildStep::Run {
                command,
                tolerate_failure,
            } => {
                let shell = if *tolerate_failure {
                    format!("{} || true", command)
                } else {
                    command.clone()
                };
                format!("RUN [\"sh\", \"-c\", {}]", quote(&shell))
            }
            BuildStep::Cmd { argv } => {
                let args: Vec<String> = argv.iter().map(|a| quote(a)).collect();
                format!("CMD [{}]", args.join(", "))
            }
        }
    }
}

/// Ordered, validated build script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildScript {
    steps: Vec<BuildStep>,
}

impl BuildScript {
    /// Start a script from a base image
    pub fn from_image(image: &str) -> Result<Self> {
        if !is_valid_image_reference(image) {
            return Err(SandboxError::Config(format!(
                "invalid base image reference: {}",
                image
            )));
        }
        Ok(Self {
            steps: vec![BuildStep::From {
                image: image.to_string(),
            }],
        })
    }

    pub fn workdir(&mut self, path: &str) -> Result<&mut Self> {
        if !path.starts_with('/') || path.contains(['\0', '\n', '\r']) {
            return Err(SandboxError::Config(format!("invalid workdir: {}", path)));
        }
        self.steps.push(BuildStep::Workdir {
            path: path.to_string(),
        });
        Ok(self)
    }

    /// Copy a context-relative file to the same relative path in the image
    pub fn copy(&mut self, path: &str) -> Result<&mut Self> {
        validate_relative_path(path)?;
        self.steps.push(BuildStep::Copy {
            src: path.to_string(),
            dest: path.to_string(),
        });
        Ok(self)
    }

    pub fn run(&mut self, command: &str, tolerate_failure: bool) -> Result<&mut Self> {
        check_command(command)?;
        self.steps.push(BuildStep::Run {
            command: command.to_string(),
            tolerate_failure,
        });
        Ok(self)
    }

    /// Final command, run through `sh -c`
    pub fn shell_cmd(&mut self, command: &str) -> Result<&mut Self> {
        check_command(command)?;
        self.steps.push(BuildStep::Cmd {
            argv: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
        });
        Ok(self)
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    /// Render as Dockerfile text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push_str(&step.render());
            out.push('\n');
        }
        out
    }
}

fn check_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(SandboxError::Validation("command cannot be empty".to_string()));
    }
    if command.contains('\0') {
        return Err(SandboxError::Validation(
            "command contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

fn quote(value: &str) -> String {
    // serde_json escapes quotes, backslashes and control characters
    serde_json::Value::String(value.to_string()).to_string()
}

/// `name[:tag]` made of lowercase alphanumerics and `._-/:` only
fn is_valid_image_reference(image: &str) -> bool {
    !image.is_empty()
        && image.len() <= 255
        && !image.starts_with(['-', ':', '/'])
        && image.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/' | ':')
        })
}
