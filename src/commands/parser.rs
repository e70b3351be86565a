//! Request line parsing.
//!
//! The first whitespace-separated token is the verb, matched without regard
//! to case. Verbs are looked up in four tables, in order: mutations, queries,
//! enumerations, service operations. `QUIT`/`EXIT` are checked before any table.

use super::types::{Command, Parsed};
use crate::error::{KvError, KvResult};

type Builder = fn(&mut Args<'_>) -> KvResult<Command>;

const MUTATIONS: &[(&str, Builder)] = &[
    ("set", set),
    ("del", del),
    ("pub", publish),
    ("inc", inc),
    ("dec", dec),
    ("incf", incf),
    ("decf", decf),
    ("append", append),
    ("prepend", prepend),
    ("expire", expire),
];

const QUERIES: &[(&str, Builder)] = &[
    ("get", get),
    ("getp", getp),
    ("ttl", ttl),
    ("sub", sub),
    ("unsub", unsub),
    ("tail", tail),
    ("prefscan", prefscan),
    ("fuzzyscan", fuzzyscan),
];

const ENUMERATIONS: &[(&str, Builder)] = &[("count", count), ("keys", keys), ("values", values)];

const SERVICES: &[(&str, Builder)] = &[("flush", flush)];

fn set(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Set {
        key: args.key()?,
        value: args.value()?,
    })
}

fn del(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Del {
        keys: args.keys()?,
    })
}

fn publish(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Pub {
        key: args.key()?,
        value: args.value()?,
    })
}

fn append(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Append {
        key: args.key()?,
        value: args.value()?,
    })
}

fn prepend(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Prepend {
        key: args.key()?,
        value: args.value()?,
    })
}

fn expire(args: &mut Args<'_>) -> KvResult<Command> {
    let key = args.key()?;
    let millis = args
        .optional_number()?
        .ok_or_else(|| KvError::InvalidArgument("missing milliseconds".to_string()))?;
    Ok(Command::Expire { key, millis })
}

fn inc(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Inc {
        key: args.key()?,
        by: args.optional_number()?,
    })
}

fn dec(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Dec {
        key: args.key()?,
        by: args.optional_number()?,
    })
}

fn incf(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Incf {
        key: args.key()?,
        by: args.optional_number()?,
    })
}

fn decf(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Decf {
        key: args.key()?,
        by: args.optional_number()?,
    })
}

fn get(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Get { key: args.key()? })
}

fn getp(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::GetP { key: args.key()? })
}

fn ttl(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Ttl { key: args.key()? })
}

fn sub(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Sub {
        keys: args.keys()?,
    })
}

fn unsub(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Unsub {
        keys: args.keys()?,
    })
}

fn tail(args: &mut Args<'_>) -> KvResult<Command> {
    let key = args.key()?;
    let from = args
        .optional_number()?
        .ok_or_else(|| KvError::InvalidArgument("missing cursor".to_string()))?;
    Ok(Command::Tail { key, from })
}

fn prefscan(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::PrefScan {
        prefix: args.key()?,
    })
}

fn fuzzyscan(args: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::FuzzyScan {
        pattern: args.key()?,
    })
}

fn count(_: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Count)
}

fn keys(_: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Keys)
}

fn values(_: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Values)
}

fn flush(_: &mut Args<'_>) -> KvResult<Command> {
    Ok(Command::Flush)
}

const TABLES: &[&[(&str, Builder)]] = &[MUTATIONS, QUERIES, ENUMERATIONS, SERVICES];

/// Splits the head token off a string, returning it with the untouched remainder.
pub fn split_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], &input[end..])),
        None => Some((input, "")),
    }
}

/// Argument cursor over the text that follows the verb.
pub struct Args<'a> {
    rest: &'a str,
}

impl<'a> Args<'a> {
    pub fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    pub fn token(&mut self) -> Option<&'a str> {
        let (token, rest) = split_token(self.rest)?;
        self.rest = rest;
        Some(token)
    }

    fn key(&mut self) -> KvResult<String> {
        self.token()
            .map(str::to_string)
            .ok_or_else(|| KvError::InvalidArgument("missing key".to_string()))
    }

    /// One or more keys, up to the end of the line.
    fn keys(&mut self) -> KvResult<Vec<String>> {
        let mut keys = vec![self.key()?];
        while let Some(key) = self.token() {
            keys.push(key.to_string());
        }
        Ok(keys)
    }

    /// Everything left on the line, surrounding whitespace removed. Inner
    /// whitespace is part of the value.
    fn value(&mut self) -> KvResult<String> {
        let value = self.rest.trim();
        self.rest = "";
        if value.is_empty() {
            return Err(KvError::InvalidArgument("missing value".to_string()));
        }
        Ok(value.to_string())
    }

    fn optional_number<T: std::str::FromStr>(&mut self) -> KvResult<Option<T>> {
        match self.token() {
            None => Ok(None),
            Some(token) => token
                .parse()
                .map(Some)
                .map_err(|_| KvError::InvalidArgument(format!("{} is not a valid number", token))),
        }
    }

    fn finish(&self) -> KvResult<()> {
        match split_token(self.rest) {
            None => Ok(()),
            Some((extra, _)) => Err(KvError::InvalidArgument(format!(
                "unexpected argument {}",
                extra
            ))),
        }
    }
}

pub fn parse(line: &str) -> KvResult<Parsed> {
    let Some((verb, rest)) = split_token(line) else {
        return Ok(Parsed::Empty);
    };
    let verb = verb.to_ascii_lowercase();

    if verb == "quit" || verb == "exit" {
        return Ok(Parsed::Quit);
    }

    let builder = TABLES
        .iter()
        .flat_map(|table| table.iter())
        .find(|(name, _)| *name == verb)
        .map(|(_, builder)| *builder)
        .ok_or_else(|| KvError::UnknownCommand(verb.clone()))?;

    let mut args = Args::new(rest);
    let command = builder(&mut args)?;
    args.finish()?;
    Ok(Parsed::Command(command))
}
