use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use remold::{
    Ctx, Engine, EngineOptions, File, FileData, FileEvent, Generate, PathFilter, Transform,
    WatcherOptions,
};

type TestResult = Result<(), Box<dyn Error>>;

fn text_of(file: &Arc<File>) -> String {
    file.text_ref().map(|c| c.into_owned()).unwrap_or_default()
}

/// Transform used by most tests here: `b.txt` is uppercased, `a.txt` pulls
/// in `b.txt`, `b_chain.txt` pulls in the absent `c.txt`.
struct SiteTransform;

#[async_trait]
impl Transform for SiteTransform {
    async fn transform(&self, ctx: &Ctx, file: &mut File, _event: FileEvent) -> anyhow::Result<()> {
        let path = file.path().to_string();
        match path.as_str() {
            "b.txt" => {
                if let Some(upper) = file.text().map(str::to_uppercase) {
                    file.set_text(upper);
                }
            }
            "a.txt" => {
                let dep = ctx.get("b.txt").await;
                let dep_text = dep
                    .as_ref()
                    .map(text_of)
                    .unwrap_or_else(|| "none".to_string());
                file.set_text(format!("a+{dep_text}"));
            }
            "b_chain.txt" => {
                let dep = ctx.get("c.txt").await;
                let dep_text = dep
                    .as_ref()
                    .map(text_of)
                    .unwrap_or_else(|| "none".to_string());
                file.set_text(format!("b+{dep_text}"));
            }
            _ => {}
        }
        Ok(())
    }
}

async fn write_files(root: &std::path::Path, files: &[(&str, &str)]) -> TestResult {
    for (name, contents) in files {
        tokio::fs::write(root.join(name), contents).await?;
    }
    Ok(())
}

#[tokio::test]
async fn dependent_sees_the_transformed_dependency() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("a.txt", "ignored"), ("b.txt", "beta")]).await?;

    let engine = Engine::new(
        EngineOptions::new(SiteTransform).watcher(WatcherOptions::new(dir.path()).watch(false)),
    )?;
    engine.exec().await?;

    // a.txt saw b.txt only after b's transform published it.
    assert_eq!(text_of(&engine.file("a.txt").unwrap()), "a+BETA");
    assert_eq!(text_of(&engine.file("b.txt").unwrap()), "BETA");
    Ok(())
}

#[tokio::test]
async fn chain_onto_an_absent_file_still_settles() -> TestResult {
    // a.txt waits on b_chain.txt, which waits on the nonexistent c.txt. The
    // absent file resolves to None first, then the chain unwinds.
    struct ChainTransform;

    #[async_trait]
    impl Transform for ChainTransform {
        async fn transform(
            &self,
            ctx: &Ctx,
            file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            let path = file.path().to_string();
            match path.as_str() {
                "a.txt" => {
                    let dep = ctx.get("b_chain.txt").await;
                    let dep_text = dep
                        .as_ref()
                        .map(text_of)
                        .unwrap_or_else(|| "none".to_string());
                    file.set_text(format!("a+{dep_text}"));
                }
                "b_chain.txt" => {
                    let dep = ctx.get("c.txt").await;
                    let dep_text = dep
                        .as_ref()
                        .map(text_of)
                        .unwrap_or_else(|| "none".to_string());
                    file.set_text(format!("b+{dep_text}"));
                }
                _ => {}
            }
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("a.txt", "x"), ("b_chain.txt", "y")]).await?;

    let engine = Engine::new(
        EngineOptions::new(ChainTransform).watcher(WatcherOptions::new(dir.path()).watch(false)),
    )?;
    engine.exec().await?;

    assert_eq!(text_of(&engine.file("b_chain.txt").unwrap()), "b+none");
    assert_eq!(text_of(&engine.file("a.txt").unwrap()), "a+b+none");
    Ok(())
}

#[tokio::test]
async fn all_files_waiting_on_an_absent_file_does_not_hang() -> TestResult {
    struct WaitForOther;

    #[async_trait]
    impl Transform for WaitForOther {
        async fn transform(
            &self,
            ctx: &Ctx,
            _file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            assert!(ctx.get("other.txt").await.is_none());
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("a.txt", "1"), ("b.txt", "2")]).await?;

    let engine = Engine::new(
        EngineOptions::new(WaitForOther).watcher(WatcherOptions::new(dir.path()).watch(false)),
    )?;
    engine.exec().await?;

    assert_eq!(text_of(&engine.file("a.txt").unwrap()), "1");
    assert_eq!(text_of(&engine.file("b.txt").unwrap()), "2");
    Ok(())
}

#[tokio::test]
async fn generator_output_is_visible_to_waiting_transforms() -> TestResult {
    struct UsesVirtual;

    #[async_trait]
    impl Transform for UsesVirtual {
        async fn transform(
            &self,
            ctx: &Ctx,
            file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            if file.path() == "uses.txt" {
                let dep = ctx.get("v.txt").await;
                let dep_text = dep
                    .as_ref()
                    .map(text_of)
                    .unwrap_or_else(|| "none".to_string());
                file.set_text(format!("got {dep_text}"));
            }
            Ok(())
        }
    }

    struct EmitVirtual;

    #[async_trait]
    impl Generate for EmitVirtual {
        async fn generate(&self, ctx: &Ctx) -> anyhow::Result<()> {
            ctx.add(FileData::text("v.txt", "3"))?;
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("uses.txt", "x")]).await?;

    let engine = Engine::new(
        EngineOptions::new(UsesVirtual)
            .watcher(WatcherOptions::new(dir.path()).watch(false))
            .generator(EmitVirtual),
    )?;
    engine.exec().await?;

    assert_eq!(text_of(&engine.file("uses.txt").unwrap()), "got 3");
    assert_eq!(text_of(&engine.file("v.txt").unwrap()), "3");
    // virtual files never show up as physical paths
    assert!(!engine.paths().contains("v.txt"));
    Ok(())
}

#[tokio::test]
async fn filter_query_sees_the_complete_match_set() -> TestResult {
    struct IndexTransform;

    #[async_trait]
    impl Transform for IndexTransform {
        async fn transform(
            &self,
            ctx: &Ctx,
            file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            let path = file.path().to_string();
            if path == "index.txt" {
                let filter = PathFilter::glob(["*.md"])?;
                let entries = ctx.get_matching(&filter).await;
                let listing: Vec<String> = entries
                    .iter()
                    .map(|f| format!("{}={}", f.path(), text_of(f)))
                    .collect();
                file.set_text(listing.join(","));
            } else if path.ends_with(".md") {
                if let Some(upper) = file.text().map(str::to_uppercase) {
                    file.set_text(upper);
                }
            }
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(
        dir.path(),
        &[("one.md", "a"), ("two.md", "b"), ("index.txt", "")],
    )
    .await?;

    let engine = Engine::new(
        EngineOptions::new(IndexTransform).watcher(WatcherOptions::new(dir.path()).watch(false)),
    )?;
    engine.exec().await?;

    // Sorted by path, and every entry is post-transform.
    assert_eq!(
        text_of(&engine.file("index.txt").unwrap()),
        "one.md=A,two.md=B"
    );
    Ok(())
}

#[tokio::test]
async fn watcher_filter_excludes_files_from_ingestion() -> TestResult {
    struct Noop;

    #[async_trait]
    impl Transform for Noop {
        async fn transform(
            &self,
            _ctx: &Ctx,
            _file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("keep.md", "k"), ("skip.rs", "s")]).await?;

    let filter = PathFilter::glob(["*.md"])?;
    let engine = Engine::new(
        EngineOptions::new(Noop).watcher(
            WatcherOptions::new(dir.path())
                .watch(false)
                .with_path_filter(filter),
        ),
    )?;
    engine.exec().await?;

    assert!(engine.file("keep.md").is_some());
    assert!(engine.file("skip.rs").is_none());
    assert_eq!(engine.paths().len(), 1);
    Ok(())
}

#[tokio::test]
async fn pre_hook_rename_keeps_the_original_file_contents() -> TestResult {
    struct Noop;

    #[async_trait]
    impl Transform for Noop {
        async fn transform(
            &self,
            _ctx: &Ctx,
            _file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("orig.txt", "hello")]).await?;

    let engine = Engine::new(
        EngineOptions::new(Noop).watcher(
            WatcherOptions::new(dir.path())
                .watch(false)
                .pre(|meta| {
                    if meta.path == "orig.txt" {
                        meta.path = "renamed.txt".to_string();
                    }
                }),
        ),
    )?;
    engine.exec().await?;

    // Published under the renamed key, read from the on-disk path.
    assert_eq!(text_of(&engine.file("renamed.txt").unwrap()), "hello");
    assert!(engine.file("orig.txt").is_none());
    assert!(engine.paths().contains("renamed.txt"));
    assert!(!engine.paths().contains("orig.txt"));
    Ok(())
}

#[tokio::test]
async fn exec_twice_fails_and_add_before_exec_fails() -> TestResult {
    struct Noop;

    #[async_trait]
    impl Transform for Noop {
        async fn transform(
            &self,
            _ctx: &Ctx,
            _file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    let engine = Engine::new(
        EngineOptions::new(Noop).watcher(WatcherOptions::new(dir.path()).watch(false)),
    )?;

    assert!(engine.add(FileData::text("early.txt", "x")).is_err());

    engine.exec().await?;
    assert!(engine.exec().await.is_err());

    // after exec, adds are accepted
    engine.add(FileData::text("late.txt", "x"))?;
    Ok(())
}

#[tokio::test]
async fn transform_errors_reach_the_callback_and_do_not_abort_the_wave() -> TestResult {
    struct FailOne;

    #[async_trait]
    impl Transform for FailOne {
        async fn transform(
            &self,
            _ctx: &Ctx,
            file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            if file.path() == "bad.txt" {
                anyhow::bail!("boom");
            }
            file.set_text("ok");
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("good.txt", "g"), ("bad.txt", "b")]).await?;

    let failures: Arc<parking_lot::Mutex<Vec<String>>> = Arc::default();
    let seen = Arc::clone(&failures);
    let engine = Engine::new(
        EngineOptions::new(FailOne)
            .watcher(WatcherOptions::new(dir.path()).watch(false))
            .on_error(move |report| {
                seen.lock()
                    .push(report.path.clone().unwrap_or_default());
            }),
    )?;
    engine.exec().await?;

    assert_eq!(*failures.lock(), vec!["bad.txt".to_string()]);
    assert_eq!(text_of(&engine.file("good.txt").unwrap()), "ok");
    // the failed file is still published, in whatever state it was left
    assert!(engine.file("bad.txt").is_some());
    Ok(())
}

#[tokio::test]
async fn resolver_applies_to_relative_requests() -> TestResult {
    struct RelativeGet;

    #[async_trait]
    impl Transform for RelativeGet {
        async fn transform(
            &self,
            ctx: &Ctx,
            file: &mut File,
            _event: FileEvent,
        ) -> anyhow::Result<()> {
            if file.path() == "docs/page.txt" {
                let dep = ctx.get("./sibling.txt").await;
                let dep_text = dep
                    .as_ref()
                    .map(text_of)
                    .unwrap_or_else(|| "none".to_string());
                file.set_text(format!("page+{dep_text}"));
            }
            Ok(())
        }
    }

    let dir = tempfile::tempdir()?;
    tokio::fs::create_dir_all(dir.path().join("docs")).await?;
    write_files(
        dir.path(),
        &[("docs/page.txt", "p"), ("docs/sibling.txt", "s")],
    )
    .await?;

    let engine = Engine::new(
        EngineOptions::new(RelativeGet)
            .watcher(WatcherOptions::new(dir.path()).watch(false))
            .resolver(|base, path| {
                if let Some(rest) = path.strip_prefix("./") {
                    match base.rsplit_once('/') {
                        Some((parent, _)) => format!("{parent}/{rest}"),
                        None => rest.to_string(),
                    }
                } else {
                    path.to_string()
                }
            }),
    )?;
    engine.exec().await?;

    assert_eq!(text_of(&engine.file("docs/page.txt").unwrap()), "page+s");
    Ok(())
}

#[tokio::test]
async fn repeated_runs_over_the_same_input_agree() -> TestResult {
    async fn run_once(root: &std::path::Path) -> anyhow::Result<Vec<(String, String)>> {
        let engine = Engine::new(
            EngineOptions::new(SiteTransform).watcher(WatcherOptions::new(root).watch(false)),
        )?;
        engine.exec().await?;
        let mut out: Vec<(String, String)> = engine
            .files()
            .iter()
            .map(|(path, file)| (path.clone(), text_of(file)))
            .collect();
        out.sort();
        Ok(out)
    }

    let dir = tempfile::tempdir()?;
    write_files(dir.path(), &[("a.txt", "x"), ("b.txt", "hey")]).await?;

    let first = run_once(dir.path()).await?;
    let second = run_once(dir.path()).await?;
    assert_eq!(first, second);
    assert!(first.iter().any(|(p, t)| p == "a.txt" && t == "a+HEY"));
    Ok(())
}
