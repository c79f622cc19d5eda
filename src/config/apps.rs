//! App display names to platform identifiers (Android packages, HarmonyOS
//! bundles, iOS bundle ids).

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::device::Platform;

/// Resolves the app names the model uses into launchable identifiers.
pub trait AppRegistry: Send + Sync {
    fn resolve(&self, app_name: &str) -> Option<String>;

    /// Display name for an identifier seen in the foreground.
    fn name_for(&self, identifier: &str) -> Option<String>;

    /// Ability to start for a HarmonyOS bundle.
    fn entry_point(&self, _identifier: &str) -> Option<String> {
        None
    }
}

/// Built-in table for one platform.
#[derive(Debug, Clone, Copy)]
pub struct StaticRegistry {
    apps: &'static Lazy<HashMap<&'static str, &'static str>>,
    abilities: Option<&'static Lazy<HashMap<&'static str, &'static str>>>,
}

impl StaticRegistry {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Adb => Self {
                apps: &ANDROID_PACKAGES,
                abilities: None,
            },
            Platform::Hdc => Self {
                apps: &HARMONY_BUNDLES,
                abilities: Some(&HARMONY_ABILITIES),
            },
            Platform::XcTest => Self {
                apps: &IOS_BUNDLES,
                abilities: None,
            },
        }
    }

    /// Every known display name, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.apps.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl AppRegistry for StaticRegistry {
    fn resolve(&self, app_name: &str) -> Option<String> {
        self.apps.get(app_name).map(|id| id.to_string())
    }

    fn name_for(&self, identifier: &str) -> Option<String> {
        // Several aliases share an identifier; pick the shortest-sorted one so
        // the answer is stable across runs.
        self.apps
            .iter()
            .filter(|(_, id)| **id == identifier)
            .map(|(name, _)| *name)
            .min_by(|a, b| a.len().cmp(&b.len()).then(a.cmp(b)))
            .map(str::to_string)
    }

    fn entry_point(&self, identifier: &str) -> Option<String> {
        self.abilities
            .and_then(|table| table.get(identifier))
            .map(|a| a.to_string())
    }
}

static ANDROID_PACKAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    
    // Social & Messaging
    m.insert("微信", "com.tencent.mm");
    m.insert("QQ", "com.tencent.mobileqq");
    m.insert("微博", "com.sina.weibo");
    
    // E-commerce
    m.insert("淘宝", "com.taobao.taobao");
    m.insert("京东", "com.jingdong.app.mall");
    m.insert("拼多多", "com.xunmeng.pinduoduo");
    m.insert("淘宝闪购", "com.taobao.taobao");
    m.insert("京东秒送", "com.jingdong.app.mall");
    
    // Lifestyle & Social
    m.insert("小红书", "com.xingin.xhs");
    m.insert("豆瓣", "com.douban.frodo");
    m.insert("知乎", "com.zhihu.android");
    
    // Maps & Navigation
    m.insert("高德地图", "com.autonavi.minimap");
    m.insert("百度地图", "com.baidu.BaiduMap");
    
    // Food & Services
    m.insert("美团", "com.sankuai.meituan");
    m.insert("大众点评", "com.dianping.v1");
    m.insert("饿了么", "me.ele");
    m.insert("肯德基", "com.yek.android.kfc.activitys");
    
    // Travel
    m.insert("携程", "ctrip.android.view");
    m.insert("铁路12306", "com.MobileTicket");
    m.insert("12306", "com.MobileTicket");
    m.insert("去哪儿", "com.Qunar");
    m.insert("去哪儿旅行", "com.Qunar");
    m.insert("滴滴出行", "com.sdu.did.psnger");
    
    // Video & Entertainment
    m.insert("bilibili", "tv.danmaku.bili");
    m.insert("抖音", "com.ss.android.ugc.aweme");
    m.insert("快手", "com.smile.gifmaker");
    m.insert("腾讯视频", "com.tencent.qqlive");
    m.insert("爱奇艺", "com.qiyi.video");
    m.insert("优酷视频", "com.youku.phone");
    m.insert("芒果TV", "com.hunantv.imgo.activity");
    m.insert("红果短剧", "com.phoenix.read");
    
    // Music & Audio
    m.insert("网易云音乐", "com.netease.cloudmusic");
    m.insert("QQ音乐", "com.tencent.qqmusic");
    m.insert("汽水音乐", "com.luna.music");
    m.insert("喜马拉雅", "com.ximalaya.ting.android");
    
    // Reading
    m.insert("番茄小说", "com.dragon.read");
    m.insert("番茄免费小说", "com.dragon.read");
    m.insert("七猫免费小说", "com.kmxs.reader");
    
    // Productivity
    m.insert("飞书", "com.ss.android.lark");
    m.insert("QQ邮箱", "com.tencent.androidqqmail");
    
    // AI & Tools
    m.insert("豆包", "com.larus.nova");
    
    // Health & Fitness
    m.insert("keep", "com.gotokeep.keep");
    m.insert("美柚", "com.lingan.seeyou");
    
    // News & Information
    m.insert("腾讯新闻", "com.tencent.news");
    m.insert("今日头条", "com.ss.android.article.news");
    
    // Real Estate
    m.insert("贝壳找房", "com.lianjia.beike");
    m.insert("安居客", "com.anjuke.android.app");
    
    // Finance
    m.insert("同花顺", "com.hexin.plat.android");
    
    // Games
    m.insert("星穹铁道", "com.miHoYo.hkrpg");
    m.insert("崩坏：星穹铁道", "com.miHoYo.hkrpg");
    m.insert("恋与深空", "com.papegames.lysk.cn");
    
    // System
    m.insert("AndroidSystemSettings", "com.android.settings");
    m.insert("Android System Settings", "com.android.settings");
    m.insert("Android  System Settings", "com.android.settings");
    m.insert("Android-System-Settings", "com.android.settings");
    m.insert("Settings", "com.android.settings");
    
    // Common apps (English names)
    m.insert("AudioRecorder", "com.android.soundrecorder");
    m.insert("audiorecorder", "com.android.soundrecorder");
    m.insert("Bluecoins", "com.rammigsoftware.bluecoins");
    m.insert("bluecoins", "com.rammigsoftware.bluecoins");
    m.insert("Broccoli", "com.flauschcode.broccoli");
    m.insert("broccoli", "com.flauschcode.broccoli");
    m.insert("Booking.com", "com.booking");
    m.insert("Booking", "com.booking");
    m.insert("booking.com", "com.booking");
    m.insert("booking", "com.booking");
    m.insert("BOOKING.COM", "com.booking");
    m.insert("Chrome", "com.android.chrome");
    m.insert("chrome", "com.android.chrome");
    m.insert("Google Chrome", "com.android.chrome");
    m.insert("Clock", "com.android.deskclock");
    m.insert("clock", "com.android.deskclock");
    m.insert("Contacts", "com.android.contacts");
    m.insert("contacts", "com.android.contacts");
    m.insert("Duolingo", "com.duolingo");
    m.insert("duolingo", "com.duolingo");
    m.insert("Expedia", "com.expedia.bookings");
    m.insert("expedia", "com.expedia.bookings");
    m.insert("设置", "com.android.settings");
    m.insert("Files", "com.android.fileexplorer");
    m.insert("files", "com.android.fileexplorer");
    m.insert("File Manager", "com.android.fileexplorer");
    m.insert("Gmail", "com.google.android.gm");
    m.insert("gmail", "com.google.android.gm");
    m.insert("Google Maps", "com.google.android.apps.maps");
    m.insert("Maps", "com.google.android.apps.maps");
    m.insert("YouTube", "com.google.android.youtube");
    m.insert("youtube", "com.google.android.youtube");
    m.insert("Camera", "com.android.camera");
    m.insert("camera", "com.android.camera");
    m.insert("Gallery", "com.android.gallery3d");
    m.insert("gallery", "com.android.gallery3d");
    m.insert("Calculator", "com.android.calculator2");
    m.insert("calculator", "com.android.calculator2");
    m.insert("Calendar", "com.android.calendar");
    m.insert("calendar", "com.android.calendar");
    m.insert("Messages", "com.android.mms");
    m.insert("messages", "com.android.mms");
    m.insert("Phone", "com.android.dialer");
    m.insert("phone", "com.android.dialer");
    
    m
});

static HARMONY_BUNDLES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("微信", "com.tencent.wechat");
    m.insert("QQ", "com.tencent.mqq");
    m.insert("微博", "com.sina.weibo.stage");
    m.insert("淘宝", "com.taobao.taobao4hmos");
    m.insert("京东", "com.jd.hm.mall");
    m.insert("拼多多", "com.xunmeng.pinduoduo.hos");
    m.insert("小红书", "com.xingin.xhs_hos");
    m.insert("知乎", "com.zhihu.hmos");
    m.insert("高德地图", "com.amap.hmapp");
    m.insert("百度地图", "com.baidu.baiduapp.map");
    m.insert("美团", "com.sankuai.hmeituan");
    m.insert("饿了么", "me.ele.eleme");
    m.insert("携程", "com.ctrip.harmonynext");
    m.insert("铁路12306", "com.chinarailway.ticketingHM");
    m.insert("12306", "com.chinarailway.ticketingHM");
    m.insert("抖音", "com.ss.hm.ugc.aweme");
    m.insert("哔哩哔哩", "yylx.danmaku.bili");
    m.insert("bilibili", "yylx.danmaku.bili");
    m.insert("设置", "com.huawei.hmos.settings");
    m.insert("Settings", "com.huawei.hmos.settings");
    m.insert("相机", "com.huawei.hmos.camera");
    m.insert("Camera", "com.huawei.hmos.camera");
    m.insert("图库", "com.huawei.hmos.photos");
    m.insert("Gallery", "com.huawei.hmos.photos");
    m.insert("计算器", "com.huawei.hmos.calculator");
    m.insert("Calculator", "com.huawei.hmos.calculator");
    m.insert("日历", "com.huawei.hmos.calendar");
    m.insert("Calendar", "com.huawei.hmos.calendar");
    m.insert("文件管理", "com.huawei.hmos.filemanager");
    m.insert("Files", "com.huawei.hmos.filemanager");
    m.insert("浏览器", "com.huawei.hmos.browser");
    m.insert("Browser", "com.huawei.hmos.browser");

    m
});

/// Bundles whose launch ability is not `EntryAbility`.
static HARMONY_ABILITIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("com.huawei.hmos.settings", "com.huawei.hmos.settings.MainAbility");
    m.insert("com.huawei.hmos.camera", "com.huawei.hmos.camera.MainAbility");
    m.insert("com.huawei.hmos.photos", "com.huawei.hmos.photos.MainAbility");
    m.insert("com.huawei.hmos.filemanager", "MainAbility");
    m.insert("com.huawei.hmos.browser", "MainAbility");

    m
});

static IOS_BUNDLES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("微信", "com.tencent.xin");
    m.insert("WeChat", "com.tencent.xin");
    m.insert("QQ", "com.tencent.mqq");
    m.insert("微博", "com.sina.weibo");
    m.insert("淘宝", "com.taobao.taobao4iphone");
    m.insert("京东", "com.360buy.jdmobile");
    m.insert("拼多多", "com.xunmeng.pinduoduo");
    m.insert("小红书", "com.xingin.discover");
    m.insert("知乎", "com.zhihu.ios");
    m.insert("高德地图", "com.autonavi.amap");
    m.insert("美团", "com.meituan.imeituan");
    m.insert("饿了么", "me.ele.ios.eleme");
    m.insert("抖音", "com.ss.iphone.ugc.Aweme");
    m.insert("Safari", "com.apple.mobilesafari");
    m.insert("Settings", "com.apple.Preferences");
    m.insert("设置", "com.apple.Preferences");
    m.insert("Camera", "com.apple.camera");
    m.insert("Photos", "com.apple.mobileslideshow");
    m.insert("Calendar", "com.apple.mobilecal");
    m.insert("Messages", "com.apple.MobileSMS");
    m.insert("Maps", "com.apple.Maps");
    m.insert("Notes", "com.apple.mobilenotes");
    m.insert("Calculator", "com.apple.calculator");
    m.insert("Files", "com.apple.DocumentsApp");
    m.insert("App Store", "com.apple.AppStore");
    m.insert("YouTube", "com.google.ios.youtube");
    m.insert("Gmail", "com.google.Gmail");

    m
});
