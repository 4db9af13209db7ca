use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("out of resources while {context}")]
    OutOfResources { context: &'static str },
    #[error("device error while {context}: {message}")]
    Device {
        context: &'static str,
        message: String,
    },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("tensor file error while {context}: {message}")]
    TensorFile {
        context: &'static str,
        message: String,
    },
    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

impl DecodeError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn out_of_resources(context: &'static str) -> Self {
        Self::OutOfResources { context }
    }

    #[allow(dead_code)] // constructed by the GPU backends and the dispatcher's GPU arm
    pub(crate) fn device(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Device {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn tensor_file(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::TensorFile {
            context,
            message: err.to_string(),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
