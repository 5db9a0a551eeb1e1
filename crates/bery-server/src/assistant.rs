//! Canned-reply assistant served under the reserved `bery-ai` identity.
//!
//! The router only sees the [`Responder`] trait, so the keyword matcher can
//! be swapped for a real model without touching routing.

/// Maps free text to a reply.
pub trait Responder: Send + Sync {
    fn respond(&self, input: &str) -> String;
}

/// How a keyword is matched against lowercased input.
#[derive(Debug, Clone, Copy)]
enum Keyword {
    /// Anywhere in the text.
    Substring(&'static str),
    /// Only as a whole word, so "hi" does not fire inside "this".
    Word(&'static str),
}

impl Keyword {
    fn matches(&self, lowered: &str) -> bool {
        match self {
            Keyword::Substring(k) => lowered.contains(k),
            Keyword::Word(k) => lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *k),
        }
    }
}

#[derive(Debug, Clone)]
struct KeywordGroup {
    topic: &'static str,
    keywords: &'static [Keyword],
    reply: &'static str,
}

impl KeywordGroup {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| k.matches(lowered))
    }
}

/// First-match keyword responder.
///
/// Groups are checked in order and the first one with a matching keyword
/// wins; input matching nothing gets the general help reply.
#[derive(Debug, Clone)]
pub struct KeywordResponder {
    groups: Vec<KeywordGroup>,
    fallback: &'static str,
}

impl KeywordResponder {
    pub fn new() -> Self {
        use Keyword::{Substring, Word};

        let groups = vec![
            KeywordGroup {
                topic: "balance",
                keywords: &[Substring("balance"), Substring("money"), Substring("wallet")],
                reply: BALANCE_REPLY,
            },
            KeywordGroup {
                topic: "invest",
                keywords: &[Substring("invest")],
                reply: INVEST_REPLY,
            },
            KeywordGroup {
                topic: "transfer",
                keywords: &[Substring("send"), Substring("transfer")],
                reply: TRANSFER_REPLY,
            },
            KeywordGroup {
                topic: "marketplace",
                keywords: &[Substring("marketplace"), Substring("buy"), Substring("shop")],
                reply: MARKETPLACE_REPLY,
            },
            KeywordGroup {
                topic: "currency",
                keywords: &[Substring("bery"), Substring("currency")],
                reply: CURRENCY_REPLY,
            },
            KeywordGroup {
                topic: "greeting",
                keywords: &[Substring("hello"), Word("hi"), Word("hey")],
                reply: GREETING_REPLY,
            },
            KeywordGroup {
                topic: "help",
                keywords: &[Substring("help"), Substring("support")],
                reply: HELP_REPLY,
            },
        ];

        Self {
            groups,
            fallback: GENERAL_REPLY,
        }
    }

    /// Topic of the group that would answer `input`, if any.
    pub fn topic(&self, input: &str) -> Option<&'static str> {
        let lowered = input.to_lowercase();
        self.groups
            .iter()
            .find(|g| g.matches(&lowered))
            .map(|g| g.topic)
    }
}

impl Default for KeywordResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Responder for KeywordResponder {
    fn respond(&self, input: &str) -> String {
        let lowered = input.to_lowercase();
        self.groups
            .iter()
            .find(|g| g.matches(&lowered))
            .map(|g| g.reply)
            .unwrap_or(self.fallback)
            .to_string()
    }
}

const BALANCE_REPLY: &str = "💰 Here's a quick look at your wallet:\n\n\
• Open the Wallet tab to see your current balance\n\
• Tap any transaction for full details\n\
• Pull down to refresh after a top-up\n\n\
Anything else about your money I can help with?";

const INVEST_REPLY: &str = "📈 Investing with Bery:\n\n\
• Browse plans in the Investments tab\n\
• Start small, you can add funds any time\n\
• Returns are shown before you confirm\n\n\
Want me to explain how a plan works?";

const TRANSFER_REPLY: &str = "💸 Sending money is easy:\n\n\
• Tap Send on the Wallet screen\n\
• Pick a contact or enter their ID\n\
• Enter the amount and confirm\n\n\
Transfers between Bery users arrive instantly.";

const MARKETPLACE_REPLY: &str = "🛍️ The Marketplace:\n\n\
• Browse products by category\n\
• Add items to your cart and apply coupons at checkout\n\
• Pay straight from your Bery wallet\n\n\
Happy shopping!";

const CURRENCY_REPLY: &str = "🪙 About Bery:\n\n\
• Bery is the in-app currency used across the store and wallet\n\
• Earn it through purchases and promotions\n\
• Spend it in the Marketplace or send it to friends\n\n\
Ask me anything else about Bery!";

const GREETING_REPLY: &str = "👋 Hi there! I'm Bery AI.\n\n\
I can help you with:\n\
• Your wallet balance\n\
• Sending money\n\
• Investments\n\
• Shopping in the Marketplace\n\n\
What would you like to do?";

const HELP_REPLY: &str = "🆘 Need help?\n\n\
• Check the FAQ under Settings\n\
• Ask me about wallet, transfers, investments or shopping\n\
• Contact support from the Profile screen\n\n\
I'm here whenever you need me.";

const GENERAL_REPLY: &str = "🤖 I'm not sure I understood that.\n\n\
Try asking me about:\n\
• Balance and wallet\n\
• Sending or transferring money\n\
• Investments\n\
• The Marketplace\n\n\
Or type \"help\" to see everything I can do.";
