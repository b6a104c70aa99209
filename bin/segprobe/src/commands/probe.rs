use clap::Parser;
use segment_loader::{
    container::remote::probe_container, HttpTransport, LoaderOptions, RequestOptions,
};
use url::Url;

#[derive(Parser, Debug, Clone)]
pub struct ProbeCommand {
    /// Print the result as JSON
    #[clap(long)]
    json: bool,

    /// Request timeout in seconds
    #[clap(long, default_value = "45")]
    timeout: u64,

    url: Url,
}

impl ProbeCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let options = LoaderOptions {
            timeout_secs: self.timeout,
            ..Default::default()
        };
        let request = RequestOptions::new(self.url.clone()).timeout(options.timeout());
        let container = probe_container(&HttpTransport::default(), &request).await?;

        if self.json {
            let output = serde_json::json!({
                "url": self.url,
                "container": container,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            match container {
                Some(container) => println!("{container}"),
                None => println!("unknown"),
            }
        }
        Ok(())
    }
}
