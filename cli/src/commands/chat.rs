use anyhow::Result;

use recipebox_core::service::{AssistantProvider, RecipeBoxService};

pub(crate) fn cmd_chat(
    svc: &RecipeBoxService,
    provider: &dyn AssistantProvider,
    message: &str,
    json: bool,
) -> Result<()> {
    // The provider drives its own async request, so step off the runtime worker first.
    let reply = tokio::task::block_in_place(|| svc.ask_assistant(provider, &[], message))?;

    if json {
        println!("{}", serde_json::json!({ "reply": reply }));
    } else {
        println!("{reply}");
    }
    Ok(())
}
