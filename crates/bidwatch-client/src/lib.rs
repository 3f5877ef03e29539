pub mod fetcher;
pub mod llm;
pub mod notifier;

#[cfg(test)]
mod test_server;

pub use fetcher::ReqwestFetcher;
pub use llm::OpenAiClassifier;
pub use notifier::{DiscordNotifier, LogNotifier};
