//! Read-only queries against a deployment

use std::error::Error;

use reqwest::Client;

use crate::core::endpoints::EndpointResolver;
use crate::core::template::TemplateClient;

pub async fn show_endpoints(resolver: &EndpointResolver) -> Result<(), Box<dyn Error>> {
    let resolved = resolver.resolve().await?;
    println!("serving:    {}", resolver.base_url());
    println!("management: {}", resolved.management_url);
    println!("inference:  {}", resolved.inference_url);
    Ok(())
}

pub async fn show_template(
    client: Client,
    resolver: &EndpointResolver,
    consumer_group: &str,
) -> Result<(), Box<dyn Error>> {
    let templates = TemplateClient::new(client, resolver);
    let reader_id = templates.fetch_reader_id(consumer_group).await?;
    let template = match templates.fetch_chat_template(&reader_id, true).await {
        Ok(template) => template,
        Err(_) => templates.fetch_chat_template(&reader_id, false).await?,
    };
    println!("{template}");
    Ok(())
}
