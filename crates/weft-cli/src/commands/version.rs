use miette::Result;
use weft_core::VERSION;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "ok": true, "version": VERSION }));
    } else {
        println!("weft {VERSION}");
    }
    Ok(())
}
