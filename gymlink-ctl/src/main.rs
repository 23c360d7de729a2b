use anyhow::Context;
use gymlink_client::{
    api::{Channel, CommentId, NewComment, NewSession, PostId, Uuid},
    ClientConfig, CommentTree, GymClient, IgnoreReason, ToggleOutcome,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    /// Per-request timeout, in milliseconds
    #[structopt(long, default_value = "10000")]
    timeout_ms: u64,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Show the logged-in user
    Whoami,

    /// Print the comments of a post
    Comments { post: Uuid },

    /// Comment on a post
    Comment {
        post: Uuid,

        content: String,

        /// Comment to reply to
        #[structopt(long)]
        parent: Option<Uuid>,
    },

    /// Like or unlike a post
    Like { post: Uuid },

    /// Follow comments and likes of a post until interrupted
    Watch { post: Uuid },
}

fn credentials() -> anyhow::Result<NewSession> {
    let user =
        std::env::var("GYMLINK_USER").context("retrieving GYMLINK_USER environment variable")?;
    let password = std::env::var("GYMLINK_PASSWORD")
        .context("retrieving GYMLINK_PASSWORD environment variable")?;
    Ok(NewSession::new(user, password))
}

fn print_tree(tree: &CommentTree) {
    for (depth, c) in tree.walk() {
        println!(
            "{:indent$}{} ({}, {}): {}",
            "",
            c.author.name,
            c.id.0,
            c.created_at.format("%Y-%m-%d %H:%M"),
            c.content,
            indent = depth * 2,
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let mut config = ClientConfig::new(&opt.host).context("parsing --host")?;
    config.request_timeout_ms = opt.timeout_ms;
    let client = GymClient::connect(config).context("building http client")?;
    let _on_invalidated = client.session_events().subscribe(|event| {
        tracing::warn!(event = event.name(), "session lost, please log in again")
    });

    let user = client
        .login(&credentials()?)
        .await
        .context("logging in")?;
    tracing::debug!(user = %user.name, "logged in");

    match opt.cmd {
        Command::Whoami => match client.whoami().await? {
            Some(u) => println!("{} ({})", u.name, u.id.0),
            None => println!("not logged in"),
        },
        Command::Comments { post } => {
            let (tree, like) = client.load_post(PostId(post)).await?;
            print_tree(&tree);
            println!("{} likes", like.count);
        }
        Command::Comment {
            post,
            content,
            parent,
        } => {
            let comment = client
                .post_comment(
                    PostId(post),
                    NewComment {
                        content,
                        parent_comment_id: parent.map(CommentId),
                    },
                )
                .await
                .context("posting comment")?;
            println!("{}", comment.id.0);
        }
        Command::Like { post } => {
            let post = PostId(post);
            client.load_post(post).await?;
            match client.toggle_like(post).await.context("toggling like")? {
                ToggleOutcome::Settled(s) => println!(
                    "{} likes, {}",
                    s.count,
                    if s.liked_by_me { "liked" } else { "not liked" }
                ),
                ToggleOutcome::Ignored(IgnoreReason::InFlight) => println!("already toggling"),
                ToggleOutcome::Ignored(IgnoreReason::Debounced) => println!("toggled too recently"),
            }
        }
        Command::Watch { post } => {
            let post = PostId(post);
            let _comments_sub = client.watch(Channel::PostComments(post)).await?;
            let _likes_sub = client.watch(Channel::PostLikes(post)).await?;
            client.load_post(post).await?;
            let mut comments = client.store().watch_comments(post);
            let mut likes = client.store().watch_likes();
            print_tree(&comments.borrow_and_update());
            loop {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        res.context("listening for ctrl-c")?;
                        break;
                    }
                    res = comments.changed() => {
                        res.context("comment store closed")?;
                        println!("---");
                        print_tree(&comments.borrow_and_update());
                    }
                    res = likes.changed() => {
                        res.context("like store closed")?;
                        if let Some(s) = likes.borrow_and_update().get(&post) {
                            println!("{} likes", s.count);
                        }
                    }
                }
            }
        }
    }

    client.logout().await.context("logging out")?;
    Ok(())
}
