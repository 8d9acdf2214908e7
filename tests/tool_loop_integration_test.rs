//! 编排循环集成测试：MockLlmClient 脚本 + 进程内工具会话

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use pilot::agent::{assemble, AgentComponents};
    use pilot::config::AppConfig;
    use pilot::core::AgentError;
    use pilot::llm::{AssistantTurn, LlmError, MockLlmClient};
    use pilot::memory::{Message, Role};
    use pilot::react::{ReactEvent, TurnOutcome};
    use pilot::repl::run_repl;
    use pilot::session::LocalSession;
    use pilot::tools::{Tool, ToolRegistry};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    /// 记录收到的参数，返回 "path=<filepath>"
    struct InspectCsv {
        seen: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl Tool for InspectCsv {
        fn name(&self) -> &str {
            "inspect_csv"
        }

        fn description(&self) -> &str {
            "Inspect a CSV file"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "title": "inspect_csvArguments",
                "type": "object",
                "properties": { "filepath": { "title": "Filepath", "type": "string" } },
                "required": ["filepath"]
            })
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            self.seen.lock().unwrap().push(args.clone());
            Ok(format!("path={}", args["filepath"].as_str().unwrap_or("")))
        }
    }

    struct ExecutePandasCode {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for ExecutePandasCode {
        fn name(&self) -> &str {
            "execute_pandas_code"
        }

        fn description(&self) -> &str {
            "Run pandas code"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran: {}", args["code"].as_str().unwrap_or("")))
        }
    }

    struct GetBalance;

    #[async_trait]
    impl Tool for GetBalance {
        fn name(&self) -> &str {
            "get_balance"
        }

        fn description(&self) -> &str {
            "Wallet balance"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("Invalid wallet address format.".to_string())
        }
    }

    struct Harness {
        agent: AgentComponents,
        mock: Arc<MockLlmClient>,
        seen: Arc<Mutex<Vec<Value>>>,
        code_calls: Arc<AtomicUsize>,
    }

    async fn harness(max_tool_rounds: usize) -> Harness {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let code_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(InspectCsv { seen: seen.clone() });
        registry.register(ExecutePandasCode {
            calls: code_calls.clone(),
        });
        registry.register(GetBalance);

        let mut cfg = AppConfig::default();
        cfg.app.max_tool_rounds = max_tool_rounds;
        let mock = Arc::new(MockLlmClient::new());
        let agent = assemble(
            &cfg,
            mock.clone(),
            Arc::new(LocalSession::new(registry)),
            None,
        )
        .await
        .unwrap();

        Harness {
            agent,
            mock,
            seen,
            code_calls,
        }
    }

    impl Harness {
        async fn turn(&mut self, input: &str) -> Result<TurnOutcome, AgentError> {
            self.agent
                .orchestrator
                .run_turn(&mut self.agent.history, input, None)
                .await
        }

        fn messages(&self) -> &[Message] {
            self.agent.history.messages()
        }

        fn tool_messages(&self) -> Vec<(&str, &str)> {
            self.messages()
                .iter()
                .filter(|m| m.role == Role::Tool)
                .map(|m| (m.tool_call_id.as_deref().unwrap_or(""), m.content.as_str()))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_exit_issues_no_model_call() {
        let mut h = harness(5).await;
        let outcome = h.turn("exit").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Exit);
        let roles: Vec<Role> = h.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User]);
        assert_eq!(h.messages()[1].content, "exit");
        assert!(h.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_plain_answer_without_tools() {
        let mut h = harness(5).await;
        h.mock.push_turn(AssistantTurn::text("The dataset has 3 columns."));
        let outcome = h.turn("describe the data").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("The dataset has 3 columns.".to_string()));
        assert_eq!(h.messages().len(), 3);

        let requests = h.mock.requests();
        assert_eq!(requests.len(), 1);
        let offered = requests[0].tool_names.clone().unwrap();
        assert_eq!(offered, ["execute_pandas_code", "get_balance", "inspect_csv"]);
    }

    #[tokio::test]
    async fn test_native_call_is_sanitized_and_paired_by_id() {
        let mut h = harness(5).await;
        h.mock.push_turn(
            AssistantTurn::default().with_call("call_abc", "inspect_csv", r#"{"filepath":"/real_crypto_2024.csv"}"#),
        );
        h.mock.push_turn(AssistantTurn::text("It has Date, symbol, Close."));

        let outcome = h.turn("what columns?").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("It has Date, symbol, Close.".to_string()));
        assert_eq!(h.seen.lock().unwrap()[0], json!({ "filepath": "data/real_crypto_2024.csv" }));
        assert_eq!(
            h.tool_messages(),
            [("call_abc", "path=data/real_crypto_2024.csv")]
        );

        // 第一次工具轮后仍在上限内，追问继续附带 tools；追问能看到 tool 结果
        let requests = h.mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].tool_names.is_some());
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
    }

    #[tokio::test]
    async fn test_bracket_calls_run_in_order_and_failures_become_text() {
        let mut h = harness(5).await;
        h.mock.push_turn(AssistantTurn::text(
            "[TOOL_CALLS][{\"name\":\"get_balance\",\"arguments\":{\"wallet_address\":\"abc\"}},\
             {\"name\":\"inspect_csv\",\"arguments\":{\"filepath\":\"prices.csv\"}}]",
        ));
        h.mock.push_turn(AssistantTurn::text("The wallet address is invalid."));

        h.turn("balance?").await.unwrap();
        assert_eq!(
            h.tool_messages(),
            [
                ("call_0", "Error: Tool execution failed: Invalid wallet address format."),
                ("call_1", "path=data/prices.csv"),
            ]
        );
        let assistant = &h.messages()[2];
        assert_eq!(assistant.role, Role::Assistant);
        let ids: Vec<&str> = assistant.invocations.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["call_0", "call_1"]);
    }

    #[tokio::test]
    async fn test_fenced_code_goes_to_code_tool() {
        let mut h = harness(5).await;
        h.mock.push_turn(AssistantTurn::text(
            "I'll compute it.\n```python\ndf = pd.read_csv('data/a.csv')\nprint(df.shape)\n```",
        ));
        h.mock.push_turn(AssistantTurn::text("There are 10 rows."));

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.agent
            .orchestrator
            .run_turn(&mut h.agent.history, "how many rows?", Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(h.code_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.tool_messages(),
            [("call_0", "ran: df = pd.read_csv('data/a.csv')\nprint(df.shape)")]
        );

        let mut code_echoed = false;
        while let Some(ev) = rx.recv().await {
            if let ReactEvent::ToolCall { code: Some(code), .. } = ev {
                code_echoed = code.starts_with("df = pd.read_csv");
            }
        }
        assert!(code_echoed);
    }

    #[tokio::test]
    async fn test_malformed_native_arguments_reported_at_dispatch() {
        let mut h = harness(5).await;
        h.mock.push_turn(
            AssistantTurn::default()
                .with_call("c1", "inspect_csv", "{\"filepath\": ")
                .with_call("c2", "execute_pandas_code", r#"{"code":"print(1)"}"#),
        );
        h.mock.push_turn(AssistantTurn::text("Retrying with valid JSON would help."));

        h.turn("inspect").await.unwrap();
        let results = h.tool_messages();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "c1");
        assert!(results[0].1.starts_with("Error: invalid arguments for inspect_csv:"));
        assert_eq!(results[1], ("c2", "ran: print(1)"));
        assert!(h.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_text() {
        let mut h = harness(5).await;
        h.mock.push_turn(AssistantTurn::default().with_call("x", "drop_database", "{}"));
        h.mock.push_turn(AssistantTurn::text("That tool does not exist."));

        h.turn("go").await.unwrap();
        assert_eq!(
            h.tool_messages(),
            [("x", "Error: Session error: Unknown tool: drop_database")]
        );
    }

    #[tokio::test]
    async fn test_model_failure_leaves_history_untouched() {
        let mut h = harness(5).await;
        h.mock.push_turn(AssistantTurn::text("first answer"));
        h.turn("first question").await.unwrap();
        let before = h.messages().to_vec();
        assert_eq!(before.len(), 3);

        h.mock.push_error(LlmError::Request("connection refused".to_string()));
        let err = h.turn("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
        assert_eq!(h.messages(), before.as_slice());

        // 下一行输入照常处理
        h.mock.push_turn(AssistantTurn::text("hi"));
        assert_eq!(h.turn("hello").await.unwrap(), TurnOutcome::Answer("hi".to_string()));
    }

    #[tokio::test]
    async fn test_multiple_rounds_until_final_answer() {
        let mut h = harness(5).await;
        h.mock
            .push_turn(AssistantTurn::default().with_call("a", "inspect_csv", r#"{"filepath":"a.csv"}"#));
        h.mock
            .push_turn(AssistantTurn::default().with_call("b", "inspect_csv", r#"{"filepath":"data/b.csv"}"#));
        h.mock.push_turn(AssistantTurn::text("Both files inspected."));

        let outcome = h.turn("inspect both").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("Both files inspected.".to_string()));
        assert_eq!(
            h.tool_messages(),
            [("a", "path=data/a.csv"), ("b", "path=data/b.csv")]
        );
        let requests = h.mock.requests();
        assert_eq!(requests.len(), 3);
        // 两轮都在上限内，每次追问都重新附带 tools
        assert!(requests[1].tool_names.is_some());
        assert!(requests[2].tool_names.is_some());
    }

    #[tokio::test]
    async fn test_two_round_limit_drops_tools_on_last_follow_up() {
        let mut h = harness(2).await;
        h.mock
            .push_turn(AssistantTurn::default().with_call("a", "inspect_csv", r#"{"filepath":"a.csv"}"#));
        h.mock
            .push_turn(AssistantTurn::default().with_call("b", "inspect_csv", r#"{"filepath":"b.csv"}"#));
        h.mock.push_turn(
            AssistantTurn::text("One more look.").with_call("c", "inspect_csv", r#"{"filepath":"c.csv"}"#),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = h
            .agent
            .orchestrator
            .run_turn(&mut h.agent.history, "inspect all", Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(outcome, TurnOutcome::Answer("One more look.".to_string()));
        assert_eq!(
            h.tool_messages(),
            [("a", "path=data/a.csv"), ("b", "path=data/b.csv")]
        );
        assert_eq!(h.seen.lock().unwrap().len(), 2);

        let requests = h.mock.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].tool_names.is_some());
        assert!(requests[1].tool_names.is_some());
        assert!(requests[2].tool_names.is_none());

        let mut limited = false;
        while let Some(ev) = rx.recv().await {
            limited |= ev == ReactEvent::RoundLimit { rounds: 2 };
        }
        assert!(limited);
    }

    #[tokio::test]
    async fn test_single_round_limit_omits_tools_and_stops() {
        let mut h = harness(1).await;
        h.mock
            .push_turn(AssistantTurn::default().with_call("a", "inspect_csv", r#"{"filepath":"a.csv"}"#));
        h.mock
            .push_turn(AssistantTurn::text("Let me run more:\n```python\nprint(2)\n```"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = h
            .agent
            .orchestrator
            .run_turn(&mut h.agent.history, "inspect", Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(
            outcome,
            TurnOutcome::Answer("Let me run more:\n```python\nprint(2)\n```".to_string())
        );
        assert_eq!(h.code_calls.load(Ordering::SeqCst), 0);
        let requests = h.mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].tool_names.is_some());
        assert!(requests[1].tool_names.is_none());

        let last = h.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.invocations.is_empty());

        let mut limited = false;
        while let Some(ev) = rx.recv().await {
            limited |= ev == ReactEvent::RoundLimit { rounds: 1 };
        }
        assert!(limited);
    }

    #[tokio::test]
    async fn test_malformed_bracket_without_fence_is_final_answer() {
        let mut h = harness(5).await;
        let raw = "[TOOL_CALLS][{\"name\": \"get_balance\", \"arguments\": {";
        h.mock.push_turn(AssistantTurn::text(raw));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = h
            .agent
            .orchestrator
            .run_turn(&mut h.agent.history, "balance", Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(outcome, TurnOutcome::Answer(raw.to_string()));
        assert!(h.tool_messages().is_empty());
        let mut warned = false;
        while let Some(ev) = rx.recv().await {
            warned |= matches!(ev, ReactEvent::NormalizeWarning { .. });
        }
        assert!(warned);
    }

    #[tokio::test]
    async fn test_repl_session_until_exit() {
        let mut h = harness(5).await;
        h.mock.push_turn(
            AssistantTurn::default().with_call("c1", "execute_pandas_code", r#"{"code":"print(42)"}"#),
        );
        h.mock.push_turn(AssistantTurn::text("The answer is 42."));

        let input: &[u8] = b"\nwhat is the answer?\nexit\nnever read\n";
        let mut out = Vec::new();
        run_repl(&mut h.agent, input, &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("Tool Call: execute_pandas_code"));
        assert!(out.contains("💻 Code:\nprint(42)"));
        assert!(out.contains("✅ Result: ran: print(42)"));
        assert!(out.contains("🤖 Assistant: The answer is 42."));
        assert!(!out.contains("never read"));

        let last = h.messages().last().unwrap();
        assert_eq!((last.role, last.content.as_str()), (Role::User, "exit"));
        assert_eq!(h.mock.requests().len(), 2);
    }
}
