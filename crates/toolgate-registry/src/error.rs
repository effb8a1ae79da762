#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{id}' is already registered")]
    DuplicateId { id: String },

    #[error("tool '{id}' not found")]
    UnknownTool { id: String },

    #[error(transparent)]
    Embed(#[from] toolgate_embed::EmbedError),
}
