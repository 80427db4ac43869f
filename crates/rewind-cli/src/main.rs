use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, sleep, timeout};
use tracing_subscriber::EnvFilter;

use rewind_core::{ChainStatus, Driver, DriverConfig, ResultHandler, Scope, Step, Task};

/// Work posted to the browser thread.
type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy)]
enum Scenario {
    Allow,
    Deny,
    FailStore,
}

impl Scenario {
    fn parse(arg: Option<&str>) -> Result<Self, String> {
        match arg {
            None | Some("allow") => Ok(Self::Allow),
            Some("deny") => Ok(Self::Deny),
            Some("fail-store") => Ok(Self::FailStore),
            Some(other) => Err(format!(
                "unknown scenario {other:?} (expected allow, deny or fail-store)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreOutcome {
    Success,
    Failure,
}

/// Single serialized thread: every callback runs here, one at a time.
#[derive(Clone)]
struct BrowserThread {
    tx: mpsc::UnboundedSender<Job>,
}

impl BrowserThread {
    fn start() -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        (Self { tx }, worker)
    }

    fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::warn!("browser thread is gone; dropping job");
        }
    }

    /// Post `job` after a simulated round-trip.
    fn post_later(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let browser = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            browser.post(job);
        });
    }
}

/// Simulated remote server with callback-style calls.
struct WebServer {
    browser: BrowserThread,
    scenario: Scenario,
}

impl WebServer {
    fn read_permissions(&self, user: String, callback: impl FnOnce(Vec<String>) + Send + 'static) {
        let permissions = match self.scenario {
            Scenario::Deny => vec!["view".to_string()],
            Scenario::Allow | Scenario::FailStore => vec!["view".to_string(), "edit".to_string()],
        };
        tracing::info!(%user, "server: reading permissions");
        self.browser
            .post_later(Duration::from_millis(50), move || callback(permissions));
    }

    fn store_value(&self, value: String, callback: impl FnOnce(StoreOutcome) + Send + 'static) {
        let outcome = match self.scenario {
            Scenario::FailStore => StoreOutcome::Failure,
            Scenario::Allow | Scenario::Deny => StoreOutcome::Success,
        };
        tracing::info!(%value, "server: storing value");
        self.browser
            .post_later(Duration::from_millis(50), move || callback(outcome));
    }
}

/// Simulated user interface; the "user" always answers after a short pause.
struct UserInterface {
    browser: BrowserThread,
}

impl UserInterface {
    fn prompt(&self, message: String, callback: impl FnOnce(String) + Send + 'static) {
        println!("{message}");
        self.browser
            .post_later(Duration::from_millis(100), move || callback("foobar".to_string()));
    }

    fn show(&self, message: &str) {
        println!("{message}");
    }
}

/// Hand a collaborator's answer back to the driver.
fn deliver<R: Send + 'static>(task: &'static str, handler: ResultHandler<R>, value: R) {
    if let Err(err) = handler.complete(value) {
        tracing::error!(task, error = %err, "chain rejected the completion");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arg = std::env::args().nth(1);
    let scenario = Scenario::parse(arg.as_deref())?;
    let config = DriverConfig::from_env()?;
    tracing::info!(?scenario, driver = %config.name, "starting demo");

    // (A) browser thread と協調オブジェクト
    let (browser, worker) = BrowserThread::start();
    let server = Arc::new(WebServer {
        browser: browser.clone(),
        scenario,
    });
    let ui = Arc::new(UserInterface {
        browser: browser.clone(),
    });

    // (B) タスク登録
    let read_permissions = {
        let server = Arc::clone(&server);
        Task::new_async(move |user: String, handler: ResultHandler<Vec<String>>| {
            server.read_permissions(user, move |perms| {
                deliver("read_permissions", handler, perms);
            });
        })
        .named("read_permissions")
    };
    let has_edit_permission =
        Task::new_sync(|perms: Vec<String>| perms.iter().any(|p| p == "edit"))
            .named("has_edit_permission");
    let notify_permissions_error = {
        let ui = Arc::clone(&ui);
        Task::new_sync(move |_: ()| ui.show("you are not allowed to edit this value"))
            .named("notify_permissions_error")
    };
    let prompt_new_value = {
        let ui = Arc::clone(&ui);
        Task::new_async(move |message: String, handler: ResultHandler<String>| {
            ui.prompt(message, move |answer| {
                deliver("prompt_new_value", handler, answer);
            });
        })
        .named("prompt_new_value")
    };
    let store_value = {
        let server = Arc::clone(&server);
        Task::new_async(move |value: String, handler: ResultHandler<StoreOutcome>| {
            server.store_value(value, move |outcome| {
                deliver("store_value", handler, outcome);
            });
        })
        .named("store_value")
    };
    let notify_store_error = {
        let ui = Arc::clone(&ui);
        Task::new_sync(move |value: String| ui.show(&format!("could not store {value:?}")))
            .named("notify_store_error")
    };

    // (C) body: 分岐を含む一連の処理を、普通の逐次コードとして書く
    let body = move |scope: &Scope| -> Step<()> {
        let perms = scope.execute(&read_permissions, "alice".to_string())?;
        if !scope.execute(&has_edit_permission, perms)? {
            scope.call(&notify_permissions_error)?;
            return Ok(());
        }
        let value = scope.execute(&prompt_new_value, "enter a new value:".to_string())?;
        if scope.execute(&store_value, value.clone())? == StoreOutcome::Failure {
            scope.execute(&notify_store_error, value)?;
        }
        Ok(())
    };

    // (D) launch も browser thread 上で行い、完了通知と直列化する
    let driver = Driver::with_config(config);
    let (done_tx, done_rx) = oneshot::channel::<()>();
    {
        let driver = driver.clone();
        browser.post(move || {
            let on_complete = move || {
                let _ = done_tx.send(());
            };
            match driver.launch_with(body, on_complete) {
                Ok(ChainStatus::Suspended) => {
                    tracing::info!("chain suspended; waiting for callbacks");
                }
                Ok(ChainStatus::Completed) => tracing::info!("chain completed on launch"),
                Err(err) => tracing::error!(error = %err, "chain failed"),
            }
        });
    }

    // (E) on_complete を待つ
    match timeout(Duration::from_secs(5), done_rx).await {
        Ok(Ok(())) => println!("chain completed: state={:?}", driver.state()),
        Ok(Err(_)) | Err(_) => {
            println!(
                "chain did not complete: state={:?} failure={:?}",
                driver.state(),
                driver.failure()
            );
        }
    }
    println!("stats: {}", serde_json::to_string_pretty(&driver.stats())?);

    worker.abort();
    Ok(())
}
