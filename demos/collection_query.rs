use dl_api_sdk::{DlClient, DlOptions, DlResult};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> DlResult<()> {
    let client = DlClient::new(DlOptions::from_env())?;
    let mut posts = client.collection("posts")?;

    let created = posts
        .create(json!({"title": "Hello", "votes": 0}))
        .await?;
    println!("created {created}");

    let popular = posts
        .where_map(&json!({"votes": [">=", 10]}))?
        .sort("created_at", -1)
        .limit(5)
        .get()
        .await?;
    println!("popular posts: {popular}");

    let total = posts.count().await?;
    println!("{total} posts in total");

    let mut pages = posts.paginate(Some(20)).await?;
    loop {
        println!(
            "page {}/{}: {} item(s)",
            pages.current_page,
            pages.last_page,
            pages.items.len()
        );
        if !pages.next().await? {
            break;
        }
    }

    Ok(())
}
