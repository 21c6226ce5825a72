use anyhow::Result;
use clap::Parser;
use portal_blocks::model::VideoData;
use portal_blocks::video;

#[derive(Parser, Debug)]
#[command(about = "Classify video URLs or pasted iframe snippets offline and print their embed URLs")]
struct Args {
    /// URLs or `<iframe ...>` snippets
    #[arg(required = true)]
    inputs: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut rejected = 0;
    for input in &args.inputs {
        match video::apply_url_input(&VideoData::default(), input) {
            Ok(data) => {
                let provider = data.provider.map(|p| p.display_name()).unwrap_or("-");
                let id = data.video_id.as_deref().unwrap_or("-");
                let embed = video::embed_for(&data).unwrap_or_default();
                println!("{provider}\t{id}\t{embed}");
            }
            Err(err) => {
                rejected += 1;
                println!("-\t-\t{err}");
            }
        }
    }

    if rejected > 0 {
        anyhow::bail!("{rejected} of {} input(s) not recognized", args.inputs.len());
    }
    Ok(())
}
