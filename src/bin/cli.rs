use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gramdex::{Alphabet, Builder, Ngrams};

#[derive(Parser, Debug)]
pub struct Cli {
    #[clap(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a trigram TSV into a binary artifact
    Build(BuildArgs),
    /// Print the frequency of an n-gram
    Freq(QueryArgs),
    /// Print the probability of an n-gram
    Prob(QueryArgs),
    /// Print the most likely successors of a 1- or 2-word prefix
    Succ(SuccArgs),
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    #[clap(short = 'o')]
    pub output_file: PathBuf,
    /// Enroll (w1, w2) explicitly for every trigram (w0, w1, w2); required
    /// unless the input is a full sliding-window corpus
    #[clap(long)]
    pub all_bigrams: bool,
    pub tsv: PathBuf,
}

#[derive(Parser, Debug)]
pub struct QueryArgs {
    pub artifact: PathBuf,
    #[clap(required = true)]
    pub words: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct SuccArgs {
    pub artifact: PathBuf,
    #[clap(short = 'k', default_value = "10")]
    pub k: usize,
    #[clap(required = true)]
    pub words: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();
    match args.cmd {
        Command::Build(a) => build(a),
        Command::Freq(a) => freq(a),
        Command::Prob(a) => prob(a),
        Command::Succ(a) => succ(a),
    }
}

fn build(args: BuildArgs) -> Result<()> {
    let stats = Builder::new(Alphabet::icelandic())
        .add_all_bigrams(args.all_bigrams)
        .build(&args.tsv, &args.output_file)
        .with_context(|| format!("build from {}", args.tsv.display()))?;
    println!("{stats}");
    Ok(())
}

fn freq(args: QueryArgs) -> Result<()> {
    let ngrams = open(&args.artifact)?;
    let words: Vec<&str> = args.words.iter().map(String::as_str).collect();
    println!("freq     {}", ngrams.freq(&words));
    println!("adj_freq {}", ngrams.adj_freq(&words));
    Ok(())
}

fn prob(args: QueryArgs) -> Result<()> {
    let ngrams = open(&args.artifact)?;
    let words: Vec<&str> = args.words.iter().map(String::as_str).collect();
    println!("prob    {:.6}", ngrams.prob(&words));
    println!("logprob {:.4}", ngrams.logprob(&words));
    Ok(())
}

fn succ(args: SuccArgs) -> Result<()> {
    let ngrams = open(&args.artifact)?;
    let words: Vec<&str> = args.words.iter().map(String::as_str).collect();
    let started = Instant::now();
    let successors = ngrams.succ(args.k, &words);
    let elapsed = started.elapsed();
    for (word, logprob) in &successors {
        println!("{logprob:9.4}  {word}");
    }
    println!("{} successors in {:.2?}", successors.len(), elapsed);
    Ok(())
}

fn open(path: &Path) -> Result<Ngrams> {
    Ngrams::open(path).with_context(|| format!("open {}", path.display()))
}
