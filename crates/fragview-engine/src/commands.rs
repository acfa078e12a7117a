//! Line-oriented command dispatch.
//!
//! A command line is `trigger[,arg]*`. An incoming line is offered to
//! every registered command whose trigger is a string prefix of the line,
//! in registration order, until one of them reports it handled the line.
//! Ambiguous-prefix commands must therefore be registered
//! most-specific-first. Lines nothing claims fall through to the generic
//! user-uniform assignment (`Uniforms::parse_line`), done by the caller.
//!
//! Handlers run on the render thread only: every transport posts lines
//! onto one event queue, so execution is serialized by construction and
//! no per-command locking exists.

/// Permissive numeric coercion used across the whole textual protocol:
/// anything that does not parse is 0. There is no error path by design.
pub fn to_float(token: &str) -> f32 {
    token.trim().parse::<f32>().unwrap_or(0.0)
}

pub fn to_int(token: &str) -> i32 {
    let t = token.trim();
    t.parse::<i32>().unwrap_or_else(|_| to_float(t) as i32)
}

/// Split a command line on commas. No quoting, no escaping: the protocol
/// is deliberately human-typable.
pub fn split_line(line: &str) -> Vec<&str> {
    line.split(',').collect()
}

type ExecFn<Ctx> = Box<dyn FnMut(&mut Ctx, &str) -> bool>;

/// One registered command: a trigger, help metadata and a handler.
///
/// The handler returns true when it consumed the line; returning false
/// lets dispatch keep scanning later registrations.
pub struct Command<Ctx> {
    pub trigger: String,
    pub usage: String,
    pub description: String,
    exec: ExecFn<Ctx>,
}

impl<Ctx> Command<Ctx> {
    pub fn new(
        trigger: &str,
        usage: &str,
        description: &str,
        exec: impl FnMut(&mut Ctx, &str) -> bool + 'static,
    ) -> Self {
        Self {
            trigger: trigger.to_string(),
            usage: usage.to_string(),
            description: description.to_string(),
            exec: Box::new(exec),
        }
    }
}

/// Help metadata snapshot, so handlers (like `help` itself) can list the
/// registry without borrowing it during dispatch.
#[derive(Debug, Clone)]
pub struct CommandHelp {
    pub trigger: String,
    pub usage: String,
    pub description: String,
}

/// Registration-ordered command list.
pub struct CommandRegistry<Ctx> {
    commands: Vec<Command<Ctx>>,
}

impl<Ctx> Default for CommandRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> CommandRegistry<Ctx> {
    pub fn new() -> Self {
        Self { commands: Vec::new() }
    }

    pub fn push(&mut self, command: Command<Ctx>) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Clone out the help metadata. Taken once after registration and
    /// handed to the context so `help` can render it.
    pub fn catalog(&self) -> Vec<CommandHelp> {
        self.commands
            .iter()
            .map(|c| CommandHelp {
                trigger: c.trigger.clone(),
                usage: c.usage.clone(),
                description: c.description.clone(),
            })
            .collect()
    }

    /// Offer `line` to every prefix-matching command in registration
    /// order until one handles it. Returns whether anything did; the
    /// caller owns the fall-through to generic uniform assignment.
    pub fn dispatch(&mut self, ctx: &mut Ctx, line: &str) -> bool {
        for command in self.commands.iter_mut() {
            if line.starts_with(command.trigger.as_str()) && (command.exec)(ctx, line) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::Uniforms;

    #[derive(Default)]
    struct Ctx {
        hits: Vec<&'static str>,
    }

    #[test]
    fn first_prefix_match_wins_when_it_resolves() {
        let mut reg: CommandRegistry<Ctx> = CommandRegistry::new();
        reg.push(Command::new("he", "he", "short", |ctx: &mut Ctx, _| {
            ctx.hits.push("he");
            true
        }));
        reg.push(Command::new("help", "help", "long", |ctx: &mut Ctx, _| {
            ctx.hits.push("help");
            true
        }));

        let mut ctx = Ctx::default();
        assert!(reg.dispatch(&mut ctx, "help"));
        // "he" is a prefix of "help" and was registered first, so it wins.
        assert_eq!(ctx.hits, vec!["he"]);
    }

    #[test]
    fn non_resolving_match_falls_through_to_later_commands() {
        let mut reg: CommandRegistry<Ctx> = CommandRegistry::new();
        reg.push(Command::new("he", "he", "short", |ctx: &mut Ctx, line| {
            ctx.hits.push("he");
            line == "he"
        }));
        reg.push(Command::new("help", "help", "long", |ctx: &mut Ctx, _| {
            ctx.hits.push("help");
            true
        }));

        let mut ctx = Ctx::default();
        assert!(reg.dispatch(&mut ctx, "help"));
        assert_eq!(ctx.hits, vec!["he", "help"]);
    }

    #[test]
    fn unhandled_line_reports_false_for_caller_fallback() {
        let mut reg: CommandRegistry<Ctx> = CommandRegistry::new();
        reg.push(Command::new("version", "version", "", |_, line| line == "version"));

        let mut ctx = Ctx::default();
        assert!(!reg.dispatch(&mut ctx, "u_speed,0.5"));

        // The caller-side fallback turns the line into a uniform upsert.
        let mut uniforms = Uniforms::new();
        assert!(uniforms.parse_line("u_speed,0.5"));
        assert!(uniforms.data.contains_key("u_speed"));
    }

    #[test]
    fn numeric_coercion_is_permissive() {
        assert_eq!(to_float("0.25"), 0.25);
        assert_eq!(to_float("banana"), 0.0);
        assert_eq!(to_float(""), 0.0);
        assert_eq!(to_int("3"), 3);
        assert_eq!(to_int("2.9"), 2);
        assert_eq!(to_int("x"), 0);
    }

    #[test]
    fn empty_and_single_token_lines_are_noops() {
        let mut uniforms = Uniforms::new();
        assert!(!uniforms.parse_line(""));
        assert!(!uniforms.parse_line("u_speed"));
        assert!(uniforms.data.is_empty());
    }
}
